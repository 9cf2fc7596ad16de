//! Outbound HTTP client adapter.
//!
//! One hyper client serves both forwarding modes behind the same port; the
//! mode only changes how the underlying pool is sized. `Pooled` keeps warm
//! connections per target host, `PerRequest` zeroes the idle pool so every
//! forward dials fresh. The mode is fixed when the adapter is built, which
//! happens once per configuration snapshot.
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use http::{header, HeaderValue, Request, Response};
use http_body_util::BodyExt;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use tokio::time::timeout;

use crate::config::models::PerformanceConfig;
use crate::ports::http_client::{HttpClient, HttpClientError, HttpClientResult};

/// How the adapter manages upstream connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardMode {
    /// Warm per-host pool, sized from `performance.max_conns_per_host`.
    Pooled,
    /// No idle pool; each forward opens a fresh connection.
    PerRequest,
}

pub struct HttpClientAdapter {
    client: Client<HttpConnector, Body>,
    mode: ForwardMode,
}

impl HttpClientAdapter {
    pub fn new(performance: &PerformanceConfig) -> Self {
        let mode = if performance.http_pool_enabled {
            ForwardMode::Pooled
        } else {
            ForwardMode::PerRequest
        };

        let mut builder = Client::builder(TokioExecutor::new());
        match mode {
            ForwardMode::Pooled => {
                builder
                    .pool_max_idle_per_host(performance.max_conns_per_host.max(1))
                    .pool_idle_timeout(Duration::from_secs(performance.idle_timeout_secs));
            }
            ForwardMode::PerRequest => {
                builder.pool_max_idle_per_host(0);
            }
        }
        let client = builder.build(HttpConnector::new());

        tracing::info!(mode = ?mode, "http client adapter created");
        Self { client, mode }
    }

    pub fn mode(&self) -> ForwardMode {
        self.mode
    }

    /// Rewrite the Host header to the request URI's authority.
    fn set_host_header(req: &mut Request<Body>) -> HttpClientResult<()> {
        let authority = req
            .uri()
            .authority()
            .ok_or_else(|| HttpClientError::InvalidRequest("outgoing URI has no host".into()))?
            .to_string();
        let value = HeaderValue::from_str(&authority)
            .map_err(|e| HttpClientError::InvalidRequest(e.to_string()))?;
        req.headers_mut().insert(header::HOST, value);
        Ok(())
    }
}

#[async_trait]
impl HttpClient for HttpClientAdapter {
    async fn send_request(&self, mut req: Request<Body>) -> HttpClientResult<Response<Body>> {
        Self::set_host_header(&mut req)?;

        let method = req.method().clone();
        let uri = req.uri().clone();

        match self.client.request(req).await {
            Ok(response) => {
                let (mut parts, body) = response.into_parts();
                // The body is re-framed downstream; a stale Transfer-Encoding
                // would corrupt the response.
                parts.headers.remove(header::TRANSFER_ENCODING);
                Ok(Response::from_parts(parts, Body::new(body)))
            }
            Err(e) => {
                tracing::error!(method = %method, uri = %uri, error = %e, "backend request failed");
                Err(HttpClientError::ConnectionError(format!(
                    "request to {method} {uri} failed: {e}"
                )))
            }
        }
    }

    async fn health_check(&self, url: &str, timeout_secs: u64) -> HttpClientResult<bool> {
        let request = Request::builder()
            .method(http::Method::HEAD)
            .uri(url)
            .body(Body::empty())
            .map_err(|e| HttpClientError::InvalidRequest(e.to_string()))?;

        match timeout(Duration::from_secs(timeout_secs), self.client.request(request)).await {
            Ok(Ok(response)) => {
                let healthy = response.status().as_u16() < 400;
                let _ = response.into_body().collect().await;
                Ok(healthy)
            }
            Ok(Err(err)) => {
                tracing::debug!(url = %url, error = %err, "health check connection error");
                Ok(false)
            }
            Err(_) => {
                tracing::debug!(url = %url, "health check timed out");
                Ok(false)
            }
        }
    }
}
