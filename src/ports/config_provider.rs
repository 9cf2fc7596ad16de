//! Configuration source capability.
use async_trait::async_trait;
use eyre::Result;
use tokio::sync::mpsc;

use crate::config::models::GatewayConfig;

/// Port for loading configuration snapshots and signaling changes.
#[async_trait]
pub trait ConfigProvider: Send + Sync {
    /// Load the current configuration.
    async fn load_config(&self) -> Result<GatewayConfig>;

    /// Channel that fires when the underlying source changed. The receiver
    /// triggers a reload by calling `load_config` again. May only be taken
    /// once.
    fn watch(&self) -> mpsc::Receiver<()>;
}
