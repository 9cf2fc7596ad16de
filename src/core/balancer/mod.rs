//! Load-balancing policies.
//!
//! A policy is internally synchronized and shared across request tasks.
//! `select_target` runs in the request hot path; implementations keep
//! critical sections short (an atomic for round-robin, one mutex for
//! weighted round-robin, an RwLock for the Ketama ring and the Consul
//! snapshot).
mod consul;
mod ketama;
mod round_robin;
mod weighted;

pub use consul::ConsulBalancer;
pub use ketama::KetamaBalancer;
pub use round_robin::RoundRobinBalancer;
pub use weighted::WeightedRoundRobinBalancer;

use std::sync::Arc;

use crate::config::models::{BalancerKind, GatewayConfig};
use crate::ports::http_client::HttpClient;

/// Per-request inputs a policy may consult when picking a target.
#[derive(Debug, Clone, Default)]
pub struct SelectionContext {
    /// Normalized request path (weighted RR keys its state by path).
    pub path: String,
    /// Client address string (Ketama hashes it).
    pub client_addr: String,
}

/// Target selection policy.
pub trait LoadBalancer: Send + Sync + 'static {
    /// Select one target from `candidates`, or `None` when the list is
    /// empty. The caller surfaces `None` as 503.
    fn select_target(&self, candidates: &[String], ctx: &SelectionContext) -> Option<String>;

    /// Policy identifier for logs and the status surface.
    fn kind(&self) -> BalancerKind;

    /// Targets the policy currently knows about, for the status surface.
    fn active_targets(&self) -> Vec<String>;
}

/// Build the policy selected by the configuration.
///
/// The consul policy needs an HTTP client for its KV watcher; the others
/// ignore it. An unknown policy name never reaches this point (serde rejects
/// it), but a consul selection without consul enabled degrades to
/// round-robin with a warning, mirroring the construction-failure fallback.
pub fn build_balancer(
    config: &GatewayConfig,
    http_client: Arc<dyn HttpClient>,
) -> Arc<dyn LoadBalancer> {
    match config.routing.load_balancer {
        BalancerKind::RoundRobin => Arc::new(RoundRobinBalancer::new()),
        BalancerKind::WeightedRoundRobin => {
            Arc::new(WeightedRoundRobinBalancer::from_rules(&config.routing.rules))
        }
        BalancerKind::Ketama => Arc::new(KetamaBalancer::new(ketama::DEFAULT_REPLICAS)),
        BalancerKind::Consul => {
            if config.consul.enabled {
                Arc::new(ConsulBalancer::start(config.consul.addr.clone(), http_client))
            } else {
                tracing::warn!(
                    "consul load balancer selected but consul is disabled, falling back to round_robin"
                );
                Arc::new(RoundRobinBalancer::new())
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::SelectionContext;

    pub fn ctx(path: &str, addr: &str) -> SelectionContext {
        SelectionContext {
            path: path.to_string(),
            client_addr: addr.to_string(),
        }
    }

    pub fn targets(list: &[&str]) -> Vec<String> {
        list.iter().map(|t| (*t).to_string()).collect()
    }
}
