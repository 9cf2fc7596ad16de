//! Core request-plane orchestration.
//!
//! `GatewayService` ties the route resolver and the load balancer together
//! and implements canary traffic steering. It deliberately performs no I/O
//! so the selection logic stays fast and testable in isolation.
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::config::models::{BalancerKind, GatewayConfig, RoutingRule};
use crate::core::balancer::{build_balancer, LoadBalancer, SelectionContext};
use crate::core::router::{build_resolver, normalize_path, RouteResolver};
use crate::ports::http_client::HttpClient;

/// Header carrying the requested traffic variant (`X-Env` on the wire).
pub const ENV_HEADER: &str = "x-env";
/// Default variant when the header is absent.
pub const STABLE_ENV: &str = "stable";
/// Variant that narrows routing to canary-tagged rules.
pub const CANARY_ENV: &str = "canary";

/// A fully resolved selection: the target plus the variant of the rule it
/// came from (egress header injection keys off the latter).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedTarget {
    pub target: String,
    pub env: Option<String>,
}

impl SelectedTarget {
    pub fn is_canary(&self) -> bool {
        self.env.as_deref() == Some(CANARY_ENV)
    }
}

pub struct GatewayService {
    resolver: Arc<dyn RouteResolver>,
    balancer: ArcSwap<Arc<dyn LoadBalancer>>,
}

impl GatewayService {
    pub fn new(config: &GatewayConfig, http_client: Arc<dyn HttpClient>) -> Self {
        let resolver = build_resolver(config.routing.engine, &config.routing.rules);
        let balancer = build_balancer(config, http_client);
        Self {
            resolver,
            balancer: ArcSwap::new(Arc::new(balancer)),
        }
    }

    /// Resolve a path to its ordered rule list.
    pub fn resolve(&self, path: &str) -> Option<Arc<Vec<RoutingRule>>> {
        self.resolver.resolve(path)
    }

    /// Swap in a balancer built from a new configuration snapshot. Requests
    /// mid-flight keep the balancer they already loaded.
    pub fn refresh_load_balancer(
        &self,
        config: &GatewayConfig,
        http_client: Arc<dyn HttpClient>,
    ) {
        let balancer = build_balancer(config, http_client);
        self.balancer.store(Arc::new(balancer));
        tracing::info!(
            load_balancer = config.routing.load_balancer.as_str(),
            "load balancer refreshed"
        );
    }

    /// Narrow `rules` by the requested variant. A canary request with no
    /// canary rules falls back to the full list with a warning; every other
    /// variant sees the full list.
    pub fn filter_rules<'a>(&self, rules: &'a [RoutingRule], env: &str, path: &str) -> Vec<&'a RoutingRule> {
        if env == CANARY_ENV {
            let canary: Vec<&RoutingRule> = rules.iter().filter(|r| r.is_canary()).collect();
            if canary.is_empty() {
                tracing::warn!(path = %path, "no canary targets available, falling back to all rules");
                rules.iter().collect()
            } else {
                canary
            }
        } else {
            rules.iter().collect()
        }
    }

    /// Run the load balancer over the filtered rules and pair the pick with
    /// its rule's variant tag.
    pub fn select_target(
        &self,
        rules: &[&RoutingRule],
        path: &str,
        client_addr: &str,
    ) -> Option<SelectedTarget> {
        let targets: Vec<String> = rules.iter().map(|r| r.target.clone()).collect();
        let ctx = SelectionContext {
            path: normalize_path(path).to_string(),
            client_addr: client_addr.to_string(),
        };

        let balancer = self.balancer.load();
        let target = balancer.select_target(&targets, &ctx)?;
        let env = rules
            .iter()
            .find(|r| r.target == target)
            .and_then(|r| r.env.clone());
        Some(SelectedTarget { target, env })
    }

    /// Full steering pass: resolve variant filter, then balance.
    pub fn steer(
        &self,
        rules: &[RoutingRule],
        env: &str,
        path: &str,
        client_addr: &str,
    ) -> Option<SelectedTarget> {
        let filtered = self.filter_rules(rules, env, path);
        self.select_target(&filtered, path, client_addr)
    }

    pub fn balancer_kind(&self) -> BalancerKind {
        self.balancer.load().kind()
    }

    pub fn active_targets(&self) -> Vec<String> {
        self.balancer.load().active_targets()
    }

    pub fn engine(&self) -> crate::config::models::RouteEngine {
        self.resolver.engine()
    }
}
