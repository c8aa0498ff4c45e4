//! The routing policy: which upstream serves a given package or file.

use std::sync::Arc;

use bytes::Bytes;

use crate::cache::ProxyCache;
use crate::config::Config;
use crate::error::ProxyError;
use crate::pypi::{
    self, filter::filter_wheel_links, normalize_package_name, package_from_filename, Upstream,
};
use crate::upstream::UpstreamClient;

/// Host serving artifact downloads for the public index. Distinct from the
/// index host: pypi.org renders pages, files.pythonhosted.org serves the
/// files those pages link to.
pub const PUBLIC_FILES_BASE: &str = "https://files.pythonhosted.org";

/// Which upstream serves a request, carrying the index base URL the
/// `X-PyPI-Source` header reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceDecision {
    Private { index_base: String },
    Public { index_base: String },
    NotFound,
}

impl SourceDecision {
    pub fn upstream(&self) -> Option<Upstream> {
        match self {
            SourceDecision::Private { .. } => Some(Upstream::Private),
            SourceDecision::Public { .. } => Some(Upstream::Public),
            SourceDecision::NotFound => None,
        }
    }

    pub fn index_base(&self) -> Option<&str> {
        match self {
            SourceDecision::Private { index_base } | SourceDecision::Public { index_base } => {
                Some(index_base)
            }
            SourceDecision::NotFound => None,
        }
    }
}

/// Where a file request gets proxied: the fully-joined upstream URL plus
/// the index base reported to the client. File bodies are never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRoute {
    pub url: String,
    pub index_base: String,
}

/// Decides per package which upstream serves, consulting the cache before
/// probing. The private index wins when both carry a package; packages on
/// the `public_only` list are pinned to the public index. A failed probe
/// aborts loudly; there is no fallback to the other upstream.
pub struct Router {
    config: Arc<Config>,
    cache: Arc<ProxyCache>,
    client: UpstreamClient,
}

impl Router {
    pub fn new(config: Arc<Config>, cache: Arc<ProxyCache>, client: UpstreamClient) -> Self {
        Router {
            config,
            cache,
            client,
        }
    }

    fn index_base(&self, upstream: Upstream) -> &str {
        match upstream {
            Upstream::Public => &self.config.public_pypi_url,
            Upstream::Private => self.config.private_index_base(),
        }
    }

    fn decision_for(&self, upstream: Upstream) -> SourceDecision {
        let index_base = self.index_base(upstream).to_string();
        match upstream {
            Upstream::Public => SourceDecision::Public { index_base },
            Upstream::Private => SourceDecision::Private { index_base },
        }
    }

    async fn upstream_exists(&self, upstream: Upstream, package: &str) -> Result<bool, ProxyError> {
        if let Some(cached) = self.cache.get_existence(upstream, package) {
            return Ok(cached);
        }
        let exists = self.client.exists(self.index_base(upstream), package).await?;
        self.cache.put_existence(upstream, package, exists);
        Ok(exists)
    }

    /// Computes the source decision for a package. Both existence probes
    /// always resolve, and each answer lands in its own cache regardless
    /// of what the other upstream said.
    pub async fn decide(&self, package: &str) -> Result<SourceDecision, ProxyError> {
        let package = normalize_package_name(package);
        let public_exists = self.upstream_exists(Upstream::Public, &package).await?;
        let private_exists = self.upstream_exists(Upstream::Private, &package).await?;

        if self.config.public_only_packages.iter().any(|p| p == &package) {
            return Ok(if public_exists {
                self.decision_for(Upstream::Public)
            } else {
                SourceDecision::NotFound
            });
        }
        if private_exists {
            Ok(self.decision_for(Upstream::Private))
        } else if public_exists {
            Ok(self.decision_for(Upstream::Public))
        } else {
            Ok(SourceDecision::NotFound)
        }
    }

    /// Serves the index page for a package: page cache first, upstream on
    /// a miss. The cache stores the raw upstream bytes; wheel filtering is
    /// applied to public pages on the way out, private pages pass through
    /// byte-for-byte.
    pub async fn simple_page(&self, package: &str) -> Result<(SourceDecision, Bytes), ProxyError> {
        let package = normalize_package_name(package);
        let decision = self.decide(&package).await?;
        let Some(upstream) = decision.upstream() else {
            return Err(ProxyError::PackageNotFound(package));
        };

        let raw = match self.cache.get_page(upstream, &package) {
            Some(page) => page,
            None => {
                let page = self
                    .client
                    .get_page(self.index_base(upstream), &package)
                    .await?;
                self.cache.put_page(upstream, &package, page.clone());
                page
            }
        };

        let body = match upstream {
            Upstream::Public => filter_wheel_links(&raw),
            Upstream::Private => raw,
        };
        Ok((decision, body))
    }

    /// Routes a file download. The package name comes from the filename,
    /// the decision reuses the index policy, and the upstream URL is the
    /// original request path appended to the chosen file host.
    pub async fn route_file(&self, request_path: &str) -> Result<FileRoute, ProxyError> {
        let filename = request_path.rsplit('/').next().unwrap_or(request_path);
        let Some(package) = package_from_filename(filename) else {
            return Err(ProxyError::MalformedRequest(format!(
                "unrecognized artifact filename: {filename}"
            )));
        };

        let decision = self.decide(package).await?;
        let (upstream, index_base) = match &decision {
            SourceDecision::NotFound => {
                return Err(ProxyError::PackageNotFound(normalize_package_name(package)));
            }
            SourceDecision::Public { index_base } => (Upstream::Public, index_base.clone()),
            SourceDecision::Private { index_base } => (Upstream::Private, index_base.clone()),
        };

        let files_base = match upstream {
            Upstream::Public => PUBLIC_FILES_BASE.to_string(),
            Upstream::Private => pypi::private_files_base(self.index_base(Upstream::Private)),
        };
        Ok(FileRoute {
            url: pypi::join_file_url(&files_base, request_path),
            index_base,
        })
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use httpmock::Method::HEAD;

    use super::*;

    const PRIVATE_FLASK_PAGE: &str = concat!(
        "<html><body><h1>Links for flask</h1>\n",
        r#"<a href="/packages/flask-3.0.0-py3-none-any.whl#sha256=aa">flask-3.0.0-py3-none-any.whl</a><br/>"#,
        "\n",
        r#"<a href="/packages/flask-3.0.0.tar.gz#sha256=bb">flask-3.0.0.tar.gz</a><br/>"#,
        "\n</body></html>",
    );

    fn test_config(public: &MockServer, private: &MockServer) -> Config {
        Config {
            public_pypi_url: public.url("/simple/"),
            private_pypi_url: Some(private.url("/simple/")),
            ..Config::default()
        }
    }

    fn router(config: Config) -> Router {
        let config = Arc::new(config);
        let cache = Arc::new(ProxyCache::new(&config));
        let client = UpstreamClient::new().expect("client builds");
        Router::new(config, cache, client)
    }

    async fn mock_existence<'a>(
        server: &'a MockServer,
        package: &str,
        status: u16,
    ) -> httpmock::Mock<'a> {
        let path = format!("/simple/{package}/");
        server
            .mock_async(move |when, then| {
                when.method(HEAD).path(path);
                then.status(status);
            })
            .await
    }

    #[tokio::test]
    async fn test_private_index_wins_when_both_carry_the_package() {
        let public = MockServer::start_async().await;
        let private = MockServer::start_async().await;
        mock_existence(&public, "mixedpkg", 200).await;
        mock_existence(&private, "mixedpkg", 200).await;

        let router = router(test_config(&public, &private));
        let decision = router.decide("mixedpkg").await.unwrap();

        assert_eq!(
            decision,
            SourceDecision::Private {
                index_base: private.url("/simple/"),
            }
        );
    }

    #[tokio::test]
    async fn test_public_serves_when_private_lacks_the_package() {
        let public = MockServer::start_async().await;
        let private = MockServer::start_async().await;
        mock_existence(&public, "numpy", 200).await;
        mock_existence(&private, "numpy", 404).await;

        let router = router(test_config(&public, &private));
        let decision = router.decide("numpy").await.unwrap();

        assert_eq!(decision.upstream(), Some(Upstream::Public));
    }

    #[tokio::test]
    async fn test_absent_everywhere_is_not_found() {
        let public = MockServer::start_async().await;
        let private = MockServer::start_async().await;
        mock_existence(&public, "nonesuch", 404).await;
        mock_existence(&private, "nonesuch", 404).await;

        let router = router(test_config(&public, &private));
        assert_eq!(
            router.decide("nonesuch").await.unwrap(),
            SourceDecision::NotFound
        );
    }

    #[tokio::test]
    async fn test_public_only_package_is_pinned_to_public() {
        let public = MockServer::start_async().await;
        let private = MockServer::start_async().await;
        mock_existence(&public, "requests", 200).await;
        mock_existence(&private, "requests", 200).await;

        let mut config = test_config(&public, &private);
        config.public_only_packages = vec!["requests".to_string()];

        let router = router(config);
        let decision = router.decide("requests").await.unwrap();
        assert_eq!(decision.upstream(), Some(Upstream::Public));
    }

    #[tokio::test]
    async fn test_public_only_package_absent_publicly_is_not_found() {
        let public = MockServer::start_async().await;
        let private = MockServer::start_async().await;
        mock_existence(&public, "requests", 404).await;
        // present privately, but the pin forbids serving it from there
        mock_existence(&private, "requests", 200).await;

        let mut config = test_config(&public, &private);
        config.public_only_packages = vec!["requests".to_string()];

        let router = router(config);
        assert_eq!(
            router.decide("requests").await.unwrap(),
            SourceDecision::NotFound
        );
    }

    #[tokio::test]
    async fn test_probe_error_aborts_without_fallback() {
        let public = MockServer::start_async().await;
        let private = MockServer::start_async().await;
        mock_existence(&public, "flask", 500).await;
        mock_existence(&private, "flask", 200).await;

        let router = router(test_config(&public, &private));
        let err = router.decide("flask").await.unwrap_err();
        assert!(matches!(err, ProxyError::UpstreamStatus { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_cached_existence_skips_further_probes() {
        let public = MockServer::start_async().await;
        let private = MockServer::start_async().await;
        let public_probe = mock_existence(&public, "flask", 404).await;
        let private_probe = mock_existence(&private, "flask", 200).await;

        let router = router(test_config(&public, &private));
        router.decide("flask").await.unwrap();
        router.decide("flask").await.unwrap();

        assert_eq!(public_probe.hits_async().await, 1);
        assert_eq!(private_probe.hits_async().await, 1);
    }

    #[tokio::test]
    async fn test_name_variants_share_one_cache_entry() {
        let public = MockServer::start_async().await;
        let private = MockServer::start_async().await;
        let public_probe = mock_existence(&public, "test-pkg", 404).await;
        let private_probe = mock_existence(&private, "test-pkg", 200).await;

        let router = router(test_config(&public, &private));
        for name in ["Test_Pkg", "test-pkg", "TEST-PKG"] {
            let decision = router.decide(name).await.unwrap();
            assert_eq!(decision.upstream(), Some(Upstream::Private));
        }

        assert_eq!(public_probe.hits_async().await, 1);
        assert_eq!(private_probe.hits_async().await, 1);
    }

    #[tokio::test]
    async fn test_private_page_passes_through_byte_for_byte() {
        let public = MockServer::start_async().await;
        let private = MockServer::start_async().await;
        mock_existence(&public, "flask", 404).await;
        mock_existence(&private, "flask", 200).await;
        private
            .mock_async(|when, then| {
                when.method(GET).path("/simple/flask/");
                then.status(200).body(PRIVATE_FLASK_PAGE);
            })
            .await;

        let router = router(test_config(&public, &private));
        let (decision, body) = router.simple_page("flask").await.unwrap();

        assert_eq!(decision.upstream(), Some(Upstream::Private));
        // wheels from the private index are trusted and survive
        assert_eq!(&body[..], PRIVATE_FLASK_PAGE.as_bytes());
    }

    #[tokio::test]
    async fn test_public_page_is_wheel_filtered() {
        let public = MockServer::start_async().await;
        let private = MockServer::start_async().await;
        mock_existence(&public, "numpy", 200).await;
        mock_existence(&private, "numpy", 404).await;
        public
            .mock_async(|when, then| {
                when.method(GET).path("/simple/numpy/");
                then.status(200).body(concat!(
                    r#"<a href="/packages/numpy-1.26.4-cp312-cp312-manylinux.whl">wheel</a><br/>"#,
                    "\n",
                    r#"<a href="/packages/numpy-1.26.4.tar.gz">sdist</a><br/>"#,
                ));
            })
            .await;

        let router = router(test_config(&public, &private));
        let (decision, body) = router.simple_page("numpy").await.unwrap();
        let body = std::str::from_utf8(&body).unwrap();

        assert_eq!(decision.upstream(), Some(Upstream::Public));
        assert!(!body.contains(".whl"));
        assert!(body.contains("numpy-1.26.4.tar.gz"));
    }

    #[tokio::test]
    async fn test_page_cache_serves_repeat_requests() {
        let public = MockServer::start_async().await;
        let private = MockServer::start_async().await;
        mock_existence(&public, "flask", 404).await;
        mock_existence(&private, "flask", 200).await;
        let page_fetch = private
            .mock_async(|when, then| {
                when.method(GET).path("/simple/flask/");
                then.status(200).body(PRIVATE_FLASK_PAGE);
            })
            .await;

        let router = router(test_config(&public, &private));
        let (_, first) = router.simple_page("flask").await.unwrap();
        let (_, second) = router.simple_page("flask").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(page_fetch.hits_async().await, 1);
    }

    #[tokio::test]
    async fn test_missing_page_is_not_found() {
        let public = MockServer::start_async().await;
        let private = MockServer::start_async().await;
        mock_existence(&public, "nonesuch", 404).await;
        mock_existence(&private, "nonesuch", 404).await;

        let router = router(test_config(&public, &private));
        let err = router.simple_page("nonesuch").await.unwrap_err();
        assert!(matches!(err, ProxyError::PackageNotFound(_)));
    }

    #[tokio::test]
    async fn test_public_file_resolves_against_the_files_host() {
        let public = MockServer::start_async().await;
        let private = MockServer::start_async().await;
        mock_existence(&public, "numpy", 200).await;
        mock_existence(&private, "numpy", 404).await;

        let router = router(test_config(&public, &private));
        let route = router
            .route_file("/packages/ab/cd/numpy-1.26.4.tar.gz")
            .await
            .unwrap();

        assert_eq!(
            route.url,
            format!("{PUBLIC_FILES_BASE}/packages/ab/cd/numpy-1.26.4.tar.gz")
        );
        assert_eq!(route.index_base, public.url("/simple/"));
    }

    #[tokio::test]
    async fn test_private_file_resolves_under_the_index_host() {
        let public = MockServer::start_async().await;
        let private = MockServer::start_async().await;
        mock_existence(&public, "flask", 404).await;
        mock_existence(&private, "flask", 200).await;

        let router = router(test_config(&public, &private));
        let route = router
            .route_file("/packages/flask-3.0.0-py3-none-any.whl")
            .await
            .unwrap();

        // the private files host is the index base minus /simple/
        assert_eq!(
            route.url,
            format!("{}/packages/flask-3.0.0-py3-none-any.whl", private.base_url())
        );
        assert_eq!(route.index_base, private.url("/simple/"));
    }

    #[tokio::test]
    async fn test_bare_filename_requests_are_routed() {
        let public = MockServer::start_async().await;
        let private = MockServer::start_async().await;
        mock_existence(&public, "click", 404).await;
        mock_existence(&private, "click", 200).await;

        let router = router(test_config(&public, &private));
        let route = router.route_file("/click-8.1.7.tar.gz").await.unwrap();
        assert_eq!(
            route.url,
            format!("{}/click-8.1.7.tar.gz", private.base_url())
        );
    }

    #[tokio::test]
    async fn test_unrecognized_filename_is_malformed() {
        let public = MockServer::start_async().await;
        let private = MockServer::start_async().await;

        let router = router(test_config(&public, &private));
        let err = router.route_file("/favicon.ico").await.unwrap_err();
        assert!(matches!(err, ProxyError::MalformedRequest(_)));
    }

    #[tokio::test]
    async fn test_file_for_unknown_package_is_not_found() {
        let public = MockServer::start_async().await;
        let private = MockServer::start_async().await;
        mock_existence(&public, "ghost", 404).await;
        mock_existence(&private, "ghost", 404).await;

        let router = router(test_config(&public, &private));
        let err = router
            .route_file("/packages/ghost-1.0.tar.gz")
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::PackageNotFound(_)));
    }
}
