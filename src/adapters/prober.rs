//! Protocol-specific liveness probes.
//!
//! Every probe carries a 5-second deadline. Outcomes are booleans; the
//! health checker owns all counting.
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;
use tonic::transport::Endpoint;
use tonic_health::pb::health_client::HealthClient;
use tonic_health::pb::HealthCheckRequest;
use tonic_health::pb::health_check_response::ServingStatus;

use crate::ports::http_client::HttpClient;
use crate::ports::prober::Prober;

const PROBE_TIMEOUT_SECS: u64 = 5;

pub struct ProtocolProber {
    http_client: Arc<dyn HttpClient>,
}

impl ProtocolProber {
    pub fn new(http_client: Arc<dyn HttpClient>) -> Self {
        Self { http_client }
    }
}

#[async_trait]
impl Prober for ProtocolProber {
    async fn probe_http(&self, target: &str, path: &str) -> bool {
        let url = format!("http://{target}{path}");
        match self.http_client.health_check(&url, PROBE_TIMEOUT_SECS).await {
            Ok(healthy) => healthy,
            Err(err) => {
                tracing::warn!(target = %target, error = %err, "http probe error");
                false
            }
        }
    }

    async fn probe_grpc(&self, target: &str, path: &str) -> bool {
        let endpoint = match Endpoint::from_shared(format!("http://{target}")) {
            Ok(endpoint) => endpoint
                .connect_timeout(Duration::from_secs(PROBE_TIMEOUT_SECS))
                .timeout(Duration::from_secs(PROBE_TIMEOUT_SECS)),
            Err(err) => {
                tracing::warn!(target = %target, error = %err, "invalid grpc target");
                return false;
            }
        };

        let channel = match endpoint.connect().await {
            Ok(channel) => channel,
            Err(err) => {
                tracing::warn!(target = %target, error = %err, "grpc dial failed");
                return false;
            }
        };

        // "/health" (the default rule path) means the whole server, as does
        // an empty service name in the health protocol.
        let service = if path == "/health" || path.is_empty() {
            String::new()
        } else {
            path.trim_start_matches('/').to_string()
        };

        let mut client = HealthClient::new(channel);
        match client.check(HealthCheckRequest { service }).await {
            Ok(response) => response.into_inner().status == ServingStatus::Serving as i32,
            Err(status) => {
                tracing::warn!(target = %target, status = %status, "grpc health check failed");
                false
            }
        }
    }

    async fn probe_websocket(&self, target: &str, path: &str) -> bool {
        let url = format!("ws://{target}{path}");
        match timeout(
            Duration::from_secs(PROBE_TIMEOUT_SECS),
            tokio_tungstenite::connect_async(url.as_str()),
        )
        .await
        {
            Ok(Ok((stream, _response))) => {
                // Successful upgrade is the signal; close immediately.
                drop(stream);
                true
            }
            Ok(Err(err)) => {
                tracing::warn!(url = %url, error = %err, "websocket probe failed");
                false
            }
            Err(_) => {
                tracing::warn!(url = %url, "websocket probe timed out");
                false
            }
        }
    }
}
