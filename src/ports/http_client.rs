//! Outbound HTTP capability.
use async_trait::async_trait;
use axum::body::Body;
use hyper::{Request, Response, StatusCode};
use thiserror::Error;

/// Errors surfaced by HTTP client implementations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpClientError {
    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("timeout after {0} seconds")]
    Timeout(u64),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("backend returned error status {status} for {url}")]
    BackendError { url: String, status: StatusCode },
}

pub type HttpClientResult<T> = Result<T, HttpClientError>;

/// Port for forwarding requests to backends and probing them.
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    /// Send a request to a backend and return its response.
    async fn send_request(&self, req: Request<Body>) -> HttpClientResult<Response<Body>>;

    /// HEAD-probe `url`, bounded by `timeout_secs`. `Ok(false)` is a
    /// reachable-but-unhealthy backend; connection errors also map to
    /// `Ok(false)` so the caller treats both as a failed probe.
    async fn health_check(&self, url: &str, timeout_secs: u64) -> HttpClientResult<bool>;
}
