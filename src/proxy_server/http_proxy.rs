//! The HTTP surface of the proxy.
//!
//! Index pages, the root stub and the health endpoint are answered
//! directly in `request_filter`; file downloads fall through to pingora's
//! upstream phases so bodies stream to the client without buffering.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use http::{header, Method, StatusCode, Uri};
use pingora::http::{RequestHeader, ResponseHeader};
use pingora::proxy::{ProxyHttp, Session};
use pingora::upstreams::peer::HttpPeer;
use pingora::{Error, ErrorType::HTTPStatus};
use serde::Serialize;

use crate::cache::{CacheStats, ProxyCache};
use crate::config::Config;
use crate::error::ProxyError;
use crate::pypi::package_from_filename;
use crate::router::{FileRoute, Router};

use super::default_peer_opts;

/// Set on every response: the index base URL a package or file was served
/// from, or the literal `proxy` for responses the gateway answers itself.
pub const SOURCE_HEADER: &str = "X-PyPI-Source";

const TEXT_HTML: &str = "text/html; charset=utf-8";
const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

const ROOT_BODY: &[u8] = b"<!DOCTYPE html>\n<html>\n  <head><title>package index proxy</title></head>\n  <body>\n    <h1>package index proxy</h1>\n    <p>Unified Simple Repository API endpoint. Point pip at <a href=\"/simple/\">/simple/</a>.</p>\n  </body>\n</html>\n";

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    cache: CacheStats,
}

/// Destination of a proxied file request, resolved during `request_filter`
/// and consumed by the upstream phases.
#[derive(Debug, PartialEq, Eq)]
struct FileTarget {
    host: String,
    port: u16,
    tls: bool,
    path_and_query: String,
}

pub struct GatewayCtx {
    file: Option<FileTarget>,
    source: Option<String>,
    started: Instant,
}

pub struct PypiGateway {
    config: Arc<Config>,
    router: Arc<Router>,
    cache: Arc<ProxyCache>,
}

impl PypiGateway {
    pub fn new(config: Arc<Config>, router: Arc<Router>, cache: Arc<ProxyCache>) -> Self {
        PypiGateway {
            config,
            router,
            cache,
        }
    }

    async fn serve_health(
        &self,
        session: &mut Session,
        ctx: &mut GatewayCtx,
        head_only: bool,
    ) -> pingora::Result<()> {
        let health = HealthResponse {
            status: "healthy",
            cache: self.cache.stats(),
        };
        let body = serde_json::to_vec(&health)
            .map_err(|e| Error::explain(HTTPStatus(500), e.to_string()))?;
        ctx.source = Some("proxy".to_string());
        write_response(
            session,
            StatusCode::OK,
            "proxy",
            "application/json",
            Bytes::from(body),
            head_only,
        )
        .await
    }

    async fn serve_simple_page(
        &self,
        session: &mut Session,
        ctx: &mut GatewayCtx,
        package: &str,
        head_only: bool,
    ) -> pingora::Result<()> {
        match self.router.simple_page(package).await {
            Ok((decision, body)) => {
                let source = decision.index_base().unwrap_or("proxy").to_string();
                ctx.source = Some(source.clone());
                write_response(session, StatusCode::OK, &source, TEXT_HTML, body, head_only).await
            }
            Err(err) => {
                if err.response_status() == 500 {
                    tracing::error!(package, error = %err, "failed to serve index page");
                }
                ctx.source = Some("proxy".to_string());
                write_proxy_error(session, &err, head_only).await
            }
        }
    }
}

#[async_trait]
impl ProxyHttp for PypiGateway {
    type CTX = GatewayCtx;

    fn new_ctx(&self) -> Self::CTX {
        GatewayCtx {
            file: None,
            source: None,
            started: Instant::now(),
        }
    }

    async fn request_filter(
        &self,
        session: &mut Session,
        ctx: &mut Self::CTX,
    ) -> pingora::Result<bool> {
        let req_header = session.req_header();
        let method = req_header.method.clone();
        let path = req_header.uri.path().to_string();

        if method != Method::GET && method != Method::HEAD {
            write_response(
                session,
                StatusCode::METHOD_NOT_ALLOWED,
                "proxy",
                TEXT_PLAIN,
                Bytes::from_static(b"only GET and HEAD are supported"),
                false,
            )
            .await?;
            return Ok(true);
        }
        let head_only = method == Method::HEAD;

        match path.as_str() {
            "/" | "/simple" | "/simple/" => {
                write_response(
                    session,
                    StatusCode::OK,
                    "proxy",
                    TEXT_HTML,
                    Bytes::from_static(ROOT_BODY),
                    head_only,
                )
                .await?;
                return Ok(true);
            }
            "/health" => {
                self.serve_health(session, ctx, head_only).await?;
                return Ok(true);
            }
            _ => {}
        }

        if let Some(package) = path.strip_prefix("/simple/") {
            let package = package.trim_end_matches('/');
            if package.is_empty() || package.contains('/') {
                let err = ProxyError::MalformedRequest(format!("invalid package path: {path}"));
                write_proxy_error(session, &err, head_only).await?;
                return Ok(true);
            }
            self.serve_simple_page(session, ctx, package, head_only)
                .await?;
            return Ok(true);
        }

        // File downloads: /packages/{...} paths or a bare /{filename}
        // with a recognized artifact suffix. Anything else is unknown.
        if !is_file_request(&path) {
            write_response(
                session,
                StatusCode::NOT_FOUND,
                "proxy",
                TEXT_PLAIN,
                Bytes::from_static(b"unknown path"),
                head_only,
            )
            .await?;
            return Ok(true);
        }

        match self.router.route_file(&path).await {
            Ok(route) => {
                let target = file_target(&route)
                    .map_err(|err| Error::explain(HTTPStatus(500), err.to_string()))?;
                ctx.source = Some(route.index_base);
                ctx.file = Some(target);
                Ok(false)
            }
            Err(err) => {
                if err.response_status() == 500 {
                    tracing::error!(path, error = %err, "failed to route file request");
                }
                write_proxy_error(session, &err, head_only).await?;
                Ok(true)
            }
        }
    }

    async fn upstream_peer(
        &self,
        _session: &mut Session,
        ctx: &mut Self::CTX,
    ) -> pingora::Result<Box<HttpPeer>> {
        let Some(file) = ctx.file.as_ref() else {
            return Err(Error::explain(HTTPStatus(404), "no upstream for this request"));
        };

        let mut peer = HttpPeer::new((file.host.as_str(), file.port), file.tls, file.host.clone());
        peer.options = default_peer_opts();
        Ok(Box::new(peer))
    }

    async fn upstream_request_filter(
        &self,
        _session: &mut Session,
        upstream_request: &mut RequestHeader,
        ctx: &mut Self::CTX,
    ) -> pingora::Result<()> {
        let Some(file) = ctx.file.as_ref() else {
            return Ok(());
        };

        let uri = Uri::try_from(file.path_and_query.as_str())
            .map_err(|e| Error::explain(HTTPStatus(500), format!("invalid upstream path: {e}")))?;
        upstream_request.set_uri(uri);
        upstream_request.insert_header(header::HOST, file.host.clone())?;
        Ok(())
    }

    /// All upstream headers pass through untouched; only the source header
    /// is added. A non-200 after a positive existence answer is a hard
    /// failure, never a fallback to the other upstream.
    async fn response_filter(
        &self,
        _session: &mut Session,
        upstream_response: &mut ResponseHeader,
        ctx: &mut Self::CTX,
    ) -> pingora::Result<()> {
        if ctx.file.is_some() && upstream_response.status != StatusCode::OK {
            return Err(Error::explain(
                HTTPStatus(500),
                format!(
                    "upstream returned {} for a proxied file",
                    upstream_response.status
                ),
            ));
        }
        if let Some(source) = ctx.source.as_deref() {
            upstream_response.insert_header(SOURCE_HEADER, source)?;
        }
        Ok(())
    }

    async fn logging(&self, session: &mut Session, _e: Option<&Error>, ctx: &mut Self::CTX) {
        if !self.config.logging.access_logs_enabled {
            return;
        }

        let duration_ms = ctx.started.elapsed().as_millis();
        let method = session.req_header().method.to_string();
        let path = session.req_header().uri.path();
        let status_code = session
            .response_written()
            .map(|v| v.status.as_u16())
            .unwrap_or_default();
        let source = ctx.source.as_deref().unwrap_or("proxy");

        tracing::info!(
            method,
            path,
            status_code,
            duration_ms,
            source,
            access_log = true
        );
    }
}

async fn write_response(
    session: &mut Session,
    status: StatusCode,
    source: &str,
    content_type: &str,
    body: Bytes,
    head_only: bool,
) -> pingora::Result<()> {
    let mut resp = ResponseHeader::build_no_case(status, Some(3))?;
    resp.append_header(header::CONTENT_TYPE, content_type)?;
    resp.append_header(SOURCE_HEADER, source)?;
    resp.append_header(header::CONTENT_LENGTH, body.len())?;

    session
        .write_response_header(Box::new(resp), head_only)
        .await?;
    if !head_only {
        session.write_response_body(Some(body), true).await?;
    }
    Ok(())
}

async fn write_proxy_error(
    session: &mut Session,
    err: &ProxyError,
    head_only: bool,
) -> pingora::Result<()> {
    let status = StatusCode::from_u16(err.response_status())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    write_response(
        session,
        status,
        "proxy",
        TEXT_PLAIN,
        Bytes::from(err.to_string()),
        head_only,
    )
    .await
}

/// A path is a file request when it lives under `/packages/` or is a bare
/// single-segment filename carrying a recognized artifact suffix.
fn is_file_request(path: &str) -> bool {
    if path.starts_with("/packages/") {
        return true;
    }
    match path.strip_prefix('/') {
        Some(rest) => !rest.contains('/') && package_from_filename(rest).is_some(),
        None => false,
    }
}

fn file_target(route: &FileRoute) -> Result<FileTarget, ProxyError> {
    let url = reqwest::Url::parse(&route.url)
        .map_err(|e| ProxyError::Internal(format!("bad upstream file url {}: {e}", route.url)))?;
    let host = url
        .host_str()
        .ok_or_else(|| {
            ProxyError::Internal(format!("upstream file url {} has no host", route.url))
        })?
        .to_string();
    let tls = url.scheme() == "https";
    let port = url.port_or_known_default().unwrap_or(if tls { 443 } else { 80 });

    let mut path_and_query = url.path().to_string();
    if let Some(query) = url.query() {
        path_and_query.push('?');
        path_and_query.push_str(query);
    }
    Ok(FileTarget {
        host,
        port,
        tls,
        path_and_query,
    })
}
