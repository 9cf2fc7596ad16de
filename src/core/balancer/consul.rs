//! Consul-backed policy.
//!
//! A background watcher polls the Consul KV entry
//! `gateway/loadbalancer/rules` (raw JSON: path -> target list) and swaps
//! the decoded snapshot under an RwLock. Selection indexes the snapshot (or
//! the caller-provided candidates when the snapshot has no entry for the
//! path) by the current time, which spreads load without per-path state.
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::body::Body;
use http_body_util::BodyExt;
use tokio_util::sync::CancellationToken;

use crate::config::models::BalancerKind;
use crate::core::balancer::{LoadBalancer, SelectionContext};
use crate::ports::http_client::HttpClient;

/// KV key holding the rules document.
pub const RULES_KEY: &str = "gateway/loadbalancer/rules";

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

pub struct ConsulBalancer {
    rules: Arc<RwLock<HashMap<String, Vec<String>>>>,
    stop: CancellationToken,
}

impl ConsulBalancer {
    /// Create the balancer and spawn its KV watcher task.
    pub fn start(consul_addr: String, http_client: Arc<dyn HttpClient>) -> Self {
        let rules = Arc::new(RwLock::new(HashMap::new()));
        let stop = CancellationToken::new();

        let watcher_rules = rules.clone();
        let watcher_stop = stop.clone();
        tokio::spawn(async move {
            watch_rules(consul_addr, http_client, watcher_rules, watcher_stop).await;
        });

        Self { rules, stop }
    }

    /// Stop the background watcher.
    pub fn shutdown(&self) {
        self.stop.cancel();
    }

    fn pick(targets: &[String]) -> Option<String> {
        if targets.is_empty() {
            return None;
        }
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos() as u64 + d.as_secs().wrapping_mul(1_000_000_000))
            .unwrap_or(0);
        Some(targets[(nanos % targets.len() as u64) as usize].clone())
    }
}

impl Drop for ConsulBalancer {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

impl LoadBalancer for ConsulBalancer {
    fn select_target(&self, candidates: &[String], ctx: &SelectionContext) -> Option<String> {
        let rules = match self.rules.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(targets) = rules.get(&ctx.path) {
            if !targets.is_empty() {
                return Self::pick(targets);
            }
        }
        Self::pick(candidates)
    }

    fn kind(&self) -> BalancerKind {
        BalancerKind::Consul
    }

    fn active_targets(&self) -> Vec<String> {
        let rules = match self.rules.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut targets: Vec<String> = rules.values().flatten().cloned().collect();
        targets.sort();
        targets.dedup();
        targets
    }
}

async fn watch_rules(
    consul_addr: String,
    http_client: Arc<dyn HttpClient>,
    rules: Arc<RwLock<HashMap<String, Vec<String>>>>,
    stop: CancellationToken,
) {
    let url = format!("http://{consul_addr}/v1/kv/{RULES_KEY}?raw=true");
    tracing::info!(url = %url, "consul rules watcher started");

    loop {
        let delay = match fetch_rules(http_client.as_ref(), &url).await {
            Ok(new_rules) => {
                {
                    let mut guard = match rules.write() {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    *guard = new_rules;
                }
                tracing::debug!("consul load balancer rules updated");
                POLL_INTERVAL
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to fetch load balancer rules from consul");
                ERROR_BACKOFF
            }
        };

        tokio::select! {
            _ = stop.cancelled() => {
                tracing::info!("consul rules watcher stopped");
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

async fn fetch_rules(
    http_client: &dyn HttpClient,
    url: &str,
) -> eyre::Result<HashMap<String, Vec<String>>> {
    let request = http::Request::builder()
        .method(http::Method::GET)
        .uri(url)
        .body(Body::empty())?;

    let response = http_client.send_request(request).await?;
    if !response.status().is_success() {
        eyre::bail!("consul returned status {}", response.status());
    }

    let bytes = response.into_body().collect().await?.to_bytes();
    let decoded: HashMap<String, Vec<String>> = serde_json::from_slice(&bytes)?;
    Ok(decoded)
}
