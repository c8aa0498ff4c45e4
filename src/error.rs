use thiserror::Error;

/// Errors surfaced at the handler boundary. Each variant maps to exactly
/// one downstream status code; no component swallows these silently.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("package {0} not found on any configured index")]
    PackageNotFound(String),

    /// The upstream could not be reached at the transport level.
    #[error("request to {upstream} for package {package} failed: {source}")]
    UpstreamRequest {
        upstream: String,
        package: String,
        #[source]
        source: reqwest::Error,
    },

    /// The upstream answered with a status the caller cannot act on.
    #[error("{upstream} returned unexpected status {status} for package {package}")]
    UpstreamStatus {
        upstream: String,
        package: String,
        status: u16,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    /// The status code this error surfaces as downstream.
    pub fn response_status(&self) -> u16 {
        match self {
            ProxyError::MalformedRequest(_) => 400,
            ProxyError::PackageNotFound(_) => 404,
            ProxyError::UpstreamRequest { .. }
            | ProxyError::UpstreamStatus { .. }
            | ProxyError::Internal(_) => 500,
        }
    }
}
