//! Liveness-probe capability, one method per backend protocol.
use async_trait::async_trait;

/// Port for protocol-specific liveness probes. Implementations bound each
/// probe with a 5-second deadline and report failures as `false` rather
/// than errors; the health checker only counts outcomes.
#[async_trait]
pub trait Prober: Send + Sync + 'static {
    /// `HEAD http://{target}{path}`; healthy iff status < 400.
    async fn probe_http(&self, target: &str, path: &str) -> bool;

    /// Standard gRPC health check against `target` (host:port) with
    /// `service` derived from `path`; healthy iff SERVING.
    async fn probe_grpc(&self, target: &str, path: &str) -> bool;

    /// WebSocket dial of `ws://{target}{path}`; healthy iff the upgrade
    /// completes. The connection is closed immediately.
    async fn probe_websocket(&self, target: &str, path: &str) -> bool;
}
