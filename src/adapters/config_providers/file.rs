//! File-based configuration provider with change notification.
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use eyre::{Context, Result};
use notify::{RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::models::GatewayConfig;
use crate::ports::config_provider::ConfigProvider;

/// Loads from a local file and watches its directory for changes.
pub struct FileConfigProvider {
    path: PathBuf,
    // Keeps the watcher alive for the provider's lifetime.
    _watcher: Option<notify::RecommendedWatcher>,
    update_tx: mpsc::Sender<()>,
    update_rx: std::sync::Mutex<Option<mpsc::Receiver<()>>>,
}

impl FileConfigProvider {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let (tx, rx) = mpsc::channel(1);

        let mut provider = Self {
            path,
            _watcher: None,
            update_tx: tx,
            update_rx: std::sync::Mutex::new(Some(rx)),
        };
        provider.init_watcher()?;
        Ok(provider)
    }

    fn init_watcher(&mut self) -> Result<()> {
        let tx = self.update_tx.clone();
        let config_filename = self
            .path
            .file_name()
            .ok_or_else(|| eyre::eyre!("invalid config path: {}", self.path.display()))?
            .to_owned();

        let mut watcher =
            notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
                match res {
                    Ok(event) => {
                        let relevant = (event.kind.is_modify()
                            || event.kind.is_create()
                            || event.kind.is_remove())
                            && event
                                .paths
                                .iter()
                                .any(|p| p.file_name() == Some(&config_filename));
                        if relevant {
                            tracing::debug!(kind = ?event.kind, "config file changed");
                            // Coalesce: a full channel already signals a reload.
                            let _ = tx.try_send(());
                        }
                    }
                    Err(e) => tracing::error!(error = ?e, "config watch error"),
                }
            })?;

        let watch_dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        watcher
            .watch(watch_dir, RecursiveMode::NonRecursive)
            .wrap_err("failed to watch config directory")?;

        self._watcher = Some(watcher);
        Ok(())
    }
}

#[async_trait]
impl ConfigProvider for FileConfigProvider {
    async fn load_config(&self) -> Result<GatewayConfig> {
        let path_str = self
            .path
            .to_str()
            .ok_or_else(|| eyre::eyre!("invalid UTF-8 path"))?;
        load_config(path_str)
    }

    fn watch(&self) -> mpsc::Receiver<()> {
        let mut guard = match self.update_rx.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.take().unwrap_or_else(|| {
            // Second take gets a dead channel rather than a panic.
            tracing::error!("config watch() called twice");
            mpsc::channel(1).1
        })
    }
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::io::Write;
    use std::time::Duration;

    use tempfile::tempdir;
    use tokio::time::sleep;

    use super::*;

    const MINIMAL: &str = r#"
server:
  port: 8081
routing:
  rules:
    "/api":
      - target: "http://127.0.0.1:9001"
"#;

    #[tokio::test]
    async fn loads_and_signals_changes() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("gateway.yaml");
        {
            let mut file = File::create(&file_path)?;
            file.write_all(MINIMAL.as_bytes())?;
        }

        let provider = FileConfigProvider::new(&file_path)?;
        let config = provider.load_config().await?;
        assert_eq!(config.server.port, 8081);

        let mut rx = provider.watch();

        sleep(Duration::from_millis(100)).await;
        {
            let mut file = File::create(&file_path)?;
            file.write_all(MINIMAL.replace("8081", "9090").as_bytes())?;
        }

        let notified = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await;
        assert!(notified.is_ok(), "timed out waiting for change signal");

        let config = provider.load_config().await?;
        assert_eq!(config.server.port, 9090);
        Ok(())
    }
}
