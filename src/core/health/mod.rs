//! Backend liveness tracking.
//!
//! The checker owns every per-target counter. The probe loop is the sole
//! writer for probe counters; the proxy mutates the business counters only
//! through [`HealthChecker::update_request_count`]. All counters are
//! monotonic. Status is reported, never used for steering.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use scc::HashMap as ConcurrentMap;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::models::{GatewayConfig, Protocol};
use crate::ports::prober::Prober;

/// Per-target counters. Timestamps are unix milliseconds (0 = never).
#[derive(Debug, Default)]
pub struct TargetStats {
    pub request_count: AtomicU64,
    pub success_count: AtomicU64,
    pub failure_count: AtomicU64,
    pub probe_request_count: AtomicU64,
    pub probe_success_count: AtomicU64,
    pub probe_failure_count: AtomicU64,
    pub last_probe_ms: AtomicU64,
    pub last_request_ms: AtomicU64,
}

struct TargetEntry {
    /// Original target string from the rule (URL or host:port).
    url: String,
    protocol: Protocol,
    health_path: String,
    stats: Arc<TargetStats>,
}

/// JSON snapshot of one target's status.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TargetStatus {
    pub url: String,
    pub protocol: &'static str,
    pub request_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub probe_request_count: u64,
    pub probe_success_count: u64,
    pub probe_failure_count: u64,
    pub last_probe_time: Option<DateTime<Utc>>,
    pub last_request_time: Option<DateTime<Utc>>,
}

impl TargetStatus {
    /// Strictly more failed probes than successful ones.
    pub fn is_unhealthy(&self) -> bool {
        self.probe_failure_count > self.probe_success_count
    }
}

/// Periodic liveness prober and counter registry.
pub struct HealthChecker {
    targets: ConcurrentMap<String, TargetEntry>,
    prober: Arc<dyn Prober>,
    heartbeat_secs: AtomicU64,
    stop: CancellationToken,
}

/// Key targets by host for HTTP/WebSocket URLs so proxy-side updates (which
/// see full URLs) and probe bookkeeping agree. gRPC targets are already
/// host:port.
fn normalize_target(target: &str, protocol: Protocol) -> String {
    if protocol == Protocol::Grpc {
        return target.to_string();
    }
    match Url::parse(target) {
        Ok(url) => match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            _ => target.to_string(),
        },
        Err(_) => target.to_string(),
    }
}

fn now_millis() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

fn millis_to_datetime(ms: u64) -> Option<DateTime<Utc>> {
    if ms == 0 {
        None
    } else {
        Utc.timestamp_millis_opt(ms as i64).single()
    }
}

impl HealthChecker {
    pub fn new(config: &GatewayConfig, prober: Arc<dyn Prober>) -> Arc<Self> {
        let checker = Arc::new(Self {
            targets: ConcurrentMap::new(),
            prober,
            heartbeat_secs: AtomicU64::new(config.routing.heartbeat_interval_secs.max(1)),
            stop: CancellationToken::new(),
        });
        checker.refresh_targets(config);
        checker
    }

    /// Rebuild the target set from a new snapshot. Counters of surviving
    /// targets are preserved by key; departed targets are dropped.
    pub fn refresh_targets(&self, config: &GatewayConfig) {
        self.heartbeat_secs.store(
            config.routing.heartbeat_interval_secs.max(1),
            Ordering::Relaxed,
        );

        let mut keep: Vec<String> = Vec::new();
        for rules in config.routing.rules.values() {
            for rule in rules {
                let key = normalize_target(&rule.target, rule.protocol);
                keep.push(key.clone());

                let existing_stats = self.targets.read(&key, |_, entry| entry.stats.clone());
                let stats = existing_stats.unwrap_or_default();
                let entry = TargetEntry {
                    url: rule.target.clone(),
                    protocol: rule.protocol,
                    health_path: rule.health_check_path.clone(),
                    stats,
                };
                // upsert: replace path/protocol, keep stats.
                if self.targets.insert(key.clone(), entry).is_err() {
                    self.targets.update(&key, |_, old| {
                        old.url = rule.target.clone();
                        old.protocol = rule.protocol;
                        old.health_path = rule.health_check_path.clone();
                    });
                }
            }
        }

        self.targets.retain(|key, _| keep.iter().any(|k| k == key));
        tracing::info!(total_targets = self.targets.len(), "health checker targets refreshed");
    }

    /// Run the heartbeat loop until the stop token fires.
    pub async fn run(self: Arc<Self>) {
        tracing::info!(
            interval_secs = self.heartbeat_secs.load(Ordering::Relaxed),
            "health checker heartbeat started"
        );
        loop {
            let interval = Duration::from_secs(self.heartbeat_secs.load(Ordering::Relaxed));
            tokio::select! {
                _ = self.stop.cancelled() => {
                    tracing::info!("health checker heartbeat stopped");
                    return;
                }
                _ = tokio::time::sleep(interval) => {
                    self.probe_all().await;
                }
            }
        }
    }

    pub fn shutdown(&self) {
        self.stop.cancel();
    }

    async fn probe_all(&self) {
        let mut batch: Vec<(String, Protocol, String, Arc<TargetStats>)> = Vec::new();
        self.targets.scan(|key, entry| {
            batch.push((
                key.clone(),
                entry.protocol,
                entry.health_path.clone(),
                entry.stats.clone(),
            ));
        });

        tracing::debug!(target_count = batch.len(), "running heartbeat probes");
        for (target, protocol, health_path, stats) in batch {
            stats.probe_request_count.fetch_add(1, Ordering::Relaxed);
            stats.last_probe_ms.store(now_millis(), Ordering::Relaxed);

            let healthy = match protocol {
                Protocol::Http => self.prober.probe_http(&target, &health_path).await,
                Protocol::Grpc => self.prober.probe_grpc(&target, &health_path).await,
                Protocol::Websocket => self.prober.probe_websocket(&target, &health_path).await,
            };

            if healthy {
                stats.probe_success_count.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(target = %target, protocol = protocol.as_str(), "probe succeeded");
            } else {
                stats.probe_failure_count.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(target = %target, protocol = protocol.as_str(), "probe failed");
            }
            crate::metrics::set_backend_probe_health(
                &target,
                stats.probe_failure_count.load(Ordering::Relaxed)
                    <= stats.probe_success_count.load(Ordering::Relaxed),
            );
        }
    }

    /// Record a forwarded request's outcome for its target. The only path
    /// that mutates the business counters.
    pub fn update_request_count(&self, target: &str, success: bool) {
        // The proxy passes full URLs; gRPC targets arrive as host:port and
        // normalize to themselves.
        let key = normalize_target(target, Protocol::Http);
        let found = self.targets.read(&key, |_, entry| entry.stats.clone());
        match found {
            Some(stats) => {
                stats.request_count.fetch_add(1, Ordering::Relaxed);
                if success {
                    stats.success_count.fetch_add(1, Ordering::Relaxed);
                } else {
                    stats.failure_count.fetch_add(1, Ordering::Relaxed);
                }
                stats.last_request_ms.store(now_millis(), Ordering::Relaxed);
            }
            None => {
                tracing::warn!(target = %target, "unknown target, request count not updated");
            }
        }
    }

    /// Copy out every target's status, sorted by (protocol, url).
    pub fn snapshot(&self) -> Vec<TargetStatus> {
        let mut statuses: Vec<TargetStatus> = Vec::new();
        self.targets.scan(|_, entry| {
            let s = &entry.stats;
            statuses.push(TargetStatus {
                url: entry.url.clone(),
                protocol: entry.protocol.as_str(),
                request_count: s.request_count.load(Ordering::Relaxed),
                success_count: s.success_count.load(Ordering::Relaxed),
                failure_count: s.failure_count.load(Ordering::Relaxed),
                probe_request_count: s.probe_request_count.load(Ordering::Relaxed),
                probe_success_count: s.probe_success_count.load(Ordering::Relaxed),
                probe_failure_count: s.probe_failure_count.load(Ordering::Relaxed),
                last_probe_time: millis_to_datetime(s.last_probe_ms.load(Ordering::Relaxed)),
                last_request_time: millis_to_datetime(s.last_request_ms.load(Ordering::Relaxed)),
            });
        });
        statuses.sort_by(|a, b| {
            a.protocol
                .cmp(b.protocol)
                .then_with(|| a.url.cmp(&b.url))
        });
        statuses
    }

    /// URLs failing the strict probe predicate, for the status surface.
    pub fn unhealthy_targets(&self) -> Vec<String> {
        self.snapshot()
            .into_iter()
            .filter(|s| s.is_unhealthy())
            .map(|s| s.url)
            .collect()
    }

    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    #[cfg(test)]
    pub(crate) async fn probe_once(&self) {
        self.probe_all().await;
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;

    use super::*;
    use crate::config::models::{GatewayConfig, RoutingRule};

    struct ScriptedProber {
        http_healthy: AtomicBool,
    }

    #[async_trait]
    impl Prober for ScriptedProber {
        async fn probe_http(&self, _target: &str, _path: &str) -> bool {
            self.http_healthy.load(Ordering::Relaxed)
        }
        async fn probe_grpc(&self, _target: &str, _path: &str) -> bool {
            true
        }
        async fn probe_websocket(&self, _target: &str, _path: &str) -> bool {
            false
        }
    }

    fn config_with_targets(targets: &[(&str, Protocol)]) -> GatewayConfig {
        let mut cfg = GatewayConfig::default();
        let rules: Vec<RoutingRule> = targets
            .iter()
            .map(|(t, p)| RoutingRule {
                target: (*t).to_string(),
                weight: 1,
                env: None,
                protocol: *p,
                health_check_path: "/health".to_string(),
            })
            .collect();
        cfg.routing.rules.insert("/api".to_string(), rules);
        cfg
    }

    fn scripted(http_healthy: bool) -> Arc<ScriptedProber> {
        Arc::new(ScriptedProber {
            http_healthy: AtomicBool::new(http_healthy),
        })
    }

    #[tokio::test]
    async fn probe_counters_advance_per_tick() {
        let cfg = config_with_targets(&[("http://127.0.0.1:9/x", Protocol::Http)]);
        let checker = HealthChecker::new(&cfg, scripted(false));

        for _ in 0..3 {
            checker.probe_once().await;
        }

        let snapshot = checker.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].probe_request_count, 3);
        assert_eq!(snapshot[0].probe_failure_count, 3);
        assert_eq!(snapshot[0].probe_success_count, 0);
        assert!(snapshot[0].is_unhealthy());
        assert_eq!(checker.unhealthy_targets(), vec!["http://127.0.0.1:9/x"]);
    }

    #[tokio::test]
    async fn business_counters_update_by_url() {
        let cfg = config_with_targets(&[("http://127.0.0.1:8081", Protocol::Http)]);
        let checker = HealthChecker::new(&cfg, scripted(true));

        checker.update_request_count("http://127.0.0.1:8081", true);
        checker.update_request_count("http://127.0.0.1:8081/some/path", false);

        let snapshot = checker.snapshot();
        assert_eq!(snapshot[0].request_count, 2);
        assert_eq!(snapshot[0].success_count, 1);
        assert_eq!(snapshot[0].failure_count, 1);
        assert!(snapshot[0].last_request_time.is_some());
    }

    #[tokio::test]
    async fn refresh_preserves_surviving_counters() {
        let cfg = config_with_targets(&[
            ("http://127.0.0.1:8081", Protocol::Http),
            ("http://127.0.0.1:8082", Protocol::Http),
        ]);
        let checker = HealthChecker::new(&cfg, scripted(true));
        checker.probe_once().await;

        // 8082 departs, 8083 arrives.
        let cfg2 = config_with_targets(&[
            ("http://127.0.0.1:8081", Protocol::Http),
            ("http://127.0.0.1:8083", Protocol::Http),
        ]);
        checker.refresh_targets(&cfg2);

        let snapshot = checker.snapshot();
        assert_eq!(snapshot.len(), 2);
        let surviving = snapshot
            .iter()
            .find(|s| s.url == "http://127.0.0.1:8081")
            .unwrap();
        assert_eq!(surviving.probe_request_count, 1);
        let fresh = snapshot
            .iter()
            .find(|s| s.url == "http://127.0.0.1:8083")
            .unwrap();
        assert_eq!(fresh.probe_request_count, 0);
    }

    #[tokio::test]
    async fn snapshot_sorts_by_protocol_then_url() {
        let cfg = config_with_targets(&[
            ("ws://127.0.0.1:8085", Protocol::Websocket),
            ("127.0.0.1:50051", Protocol::Grpc),
            ("http://127.0.0.1:8082", Protocol::Http),
            ("http://127.0.0.1:8081", Protocol::Http),
        ]);
        let checker = HealthChecker::new(&cfg, scripted(true));

        let order: Vec<(String, String)> = checker
            .snapshot()
            .into_iter()
            .map(|s| (s.protocol.to_string(), s.url))
            .collect();
        assert_eq!(
            order,
            vec![
                ("grpc".to_string(), "127.0.0.1:50051".to_string()),
                ("http".to_string(), "http://127.0.0.1:8081".to_string()),
                ("http".to_string(), "http://127.0.0.1:8082".to_string()),
                ("websocket".to_string(), "ws://127.0.0.1:8085".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn counters_are_monotonic_across_mixed_traffic() {
        let cfg = config_with_targets(&[("http://127.0.0.1:8081", Protocol::Http)]);
        let checker = HealthChecker::new(&cfg, scripted(true));

        let mut last = 0u64;
        for i in 0..10 {
            checker.update_request_count("http://127.0.0.1:8081", i % 2 == 0);
            let snap = &checker.snapshot()[0];
            assert!(snap.request_count > last);
            last = snap.request_count;
        }
    }
}
