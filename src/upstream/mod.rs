//! HTTP client for the two primitive index operations the routing engine
//! needs: existence probes and page fetches.

use std::time::Duration;

use bytes::Bytes;
use reqwest::{redirect, StatusCode};

use crate::error::ProxyError;
use crate::pypi::simple_index_url;

/// Ceiling applied to every upstream call, index probes and proxied file
/// connections alike. The client performs no retries.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for probing and fetching Simple API index pages.
///
/// Redirects are never followed: a Simple API endpoint answering with a
/// redirect is treated as not carrying the package. The underlying
/// connection pool is shared and safe for concurrent use.
#[derive(Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
}

impl UpstreamClient {
    pub fn new() -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .redirect(redirect::Policy::none())
            .user_agent(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ))
            .build()?;
        Ok(UpstreamClient { http })
    }

    /// Asks `base` whether it carries `package` with a HEAD to
    /// `{base}/{package}/`, falling back to GET when the index rejects
    /// HEAD with a 405. 2xx means present; 404 and any 3xx mean absent;
    /// anything else surfaces as an upstream failure.
    pub async fn exists(&self, base: &str, package: &str) -> Result<bool, ProxyError> {
        let url = simple_index_url(base, package);
        let response = self
            .http
            .head(&url)
            .send()
            .await
            .map_err(|source| request_error(base, package, source))?;

        let status = response.status();
        if status == StatusCode::METHOD_NOT_ALLOWED {
            // body discarded; only presence matters
            let response = self
                .http
                .get(&url)
                .send()
                .await
                .map_err(|source| request_error(base, package, source))?;
            return classify_existence(base, package, response.status());
        }
        classify_existence(base, package, status)
    }

    /// Fetches the rendered index page for `package`. Only a 200 carries a
    /// usable body; any other status is an error carrying its code.
    pub async fn get_page(&self, base: &str, package: &str) -> Result<Bytes, ProxyError> {
        let url = simple_index_url(base, package);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|source| request_error(base, package, source))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(ProxyError::UpstreamStatus {
                upstream: base.to_string(),
                package: package.to_string(),
                status: status.as_u16(),
            });
        }
        response
            .bytes()
            .await
            .map_err(|source| request_error(base, package, source))
    }
}

fn request_error(base: &str, package: &str, source: reqwest::Error) -> ProxyError {
    ProxyError::UpstreamRequest {
        upstream: base.to_string(),
        package: package.to_string(),
        source,
    }
}

fn classify_existence(base: &str, package: &str, status: StatusCode) -> Result<bool, ProxyError> {
    if status.is_success() {
        Ok(true)
    } else if status.is_redirection() || status == StatusCode::NOT_FOUND {
        Ok(false)
    } else {
        Err(ProxyError::UpstreamStatus {
            upstream: base.to_string(),
            package: package.to_string(),
            status: status.as_u16(),
        })
    }
}
