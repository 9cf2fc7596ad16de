//! Weighted round-robin policy.
use std::collections::HashMap;
use std::sync::Mutex;

use indexmap::IndexMap;

use crate::config::models::{BalancerKind, RoutingRule};
use crate::core::balancer::{LoadBalancer, SelectionContext};

struct WrrState {
    targets: Vec<String>,
    weights: Vec<u32>,
    count: u64,
}

/// Cumulative-weight walk keyed by request path.
///
/// Each call advances a per-path counter and maps `count % total_weight`
/// into the cumulative weight distribution, so any window of exactly
/// `total_weight` consecutive selections picks target `i` exactly `w_i`
/// times. The walk is restricted to the caller's candidate list, which the
/// canary filter may have narrowed below the configured set. Zero-weight
/// targets are never selected; a single candidate returns directly.
pub struct WeightedRoundRobinBalancer {
    states: Mutex<HashMap<String, WrrState>>,
}

impl WeightedRoundRobinBalancer {
    pub fn from_rules(rules: &IndexMap<String, Vec<RoutingRule>>) -> Self {
        let mut states = HashMap::new();
        for (path, rule_list) in rules {
            states.insert(
                normalize_key(path),
                WrrState {
                    targets: rule_list.iter().map(|r| r.target.clone()).collect(),
                    weights: rule_list.iter().map(|r| r.weight).collect(),
                    count: 0,
                },
            );
        }
        Self {
            states: Mutex::new(states),
        }
    }
}

fn normalize_key(path: &str) -> String {
    crate::core::router::normalize_path(path).to_string()
}

impl LoadBalancer for WeightedRoundRobinBalancer {
    fn select_target(&self, candidates: &[String], ctx: &SelectionContext) -> Option<String> {
        if candidates.is_empty() {
            return None;
        }
        if candidates.len() == 1 {
            return Some(candidates[0].clone());
        }

        let mut states = match self.states.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let state = states.get_mut(&normalize_key(&ctx.path))?;

        // The configured entries that survived candidate filtering, in
        // configured order.
        let view: Vec<(usize, u64)> = state
            .targets
            .iter()
            .enumerate()
            .filter(|(_, target)| candidates.contains(target))
            .map(|(i, _)| (i, u64::from(state.weights[i])))
            .collect();

        let total: u64 = view.iter().map(|(_, w)| w).sum();
        if view.is_empty() || total == 0 {
            return None;
        }

        state.count += 1;
        let pos = (state.count - 1) % total;

        let mut accumulator: u64 = 0;
        for (index, weight) in &view {
            accumulator += weight;
            if pos < accumulator {
                return Some(state.targets[*index].clone());
            }
        }
        None
    }

    fn kind(&self) -> BalancerKind {
        BalancerKind::WeightedRoundRobin
    }

    fn active_targets(&self) -> Vec<String> {
        let states = match self.states.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut targets: Vec<String> = states
            .values()
            .flat_map(|s| s.targets.iter().cloned())
            .collect();
        targets.sort();
        targets.dedup();
        targets
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use indexmap::IndexMap;

    use super::*;
    use crate::config::models::Protocol;
    use crate::core::balancer::test_support::{ctx, targets};

    fn rules(entries: &[(&str, u32)]) -> Vec<RoutingRule> {
        entries
            .iter()
            .map(|(target, weight)| RoutingRule {
                target: (*target).to_string(),
                weight: *weight,
                env: None,
                protocol: Protocol::Http,
                health_check_path: "/health".to_string(),
            })
            .collect()
    }

    fn balancer(path: &str, entries: &[(&str, u32)]) -> WeightedRoundRobinBalancer {
        let mut map = IndexMap::new();
        map.insert(path.to_string(), rules(entries));
        WeightedRoundRobinBalancer::from_rules(&map)
    }

    #[test]
    fn exact_proportions_over_one_window() {
        let balancer = balancer("/api/v1/user", &[("http://a:1", 80), ("http://b:2", 20)]);
        let candidates = targets(&["http://a:1", "http://b:2"]);
        let context = ctx("/api/v1/user", "10.0.0.1:5000");

        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..100 {
            let pick = balancer.select_target(&candidates, &context).unwrap();
            *counts.entry(pick).or_default() += 1;
        }
        assert_eq!(counts["http://a:1"], 80);
        assert_eq!(counts["http://b:2"], 20);
    }

    #[test]
    fn proportions_hold_in_every_aligned_window() {
        let balancer = balancer(
            "/api",
            &[("http://a:1", 3), ("http://b:2", 2), ("http://c:3", 1)],
        );
        let candidates = targets(&["http://a:1", "http://b:2", "http://c:3"]);
        let context = ctx("/api", "");

        for _window in 0..5 {
            let mut counts: HashMap<String, usize> = HashMap::new();
            for _ in 0..6 {
                let pick = balancer.select_target(&candidates, &context).unwrap();
                *counts.entry(pick).or_default() += 1;
            }
            assert_eq!(counts["http://a:1"], 3);
            assert_eq!(counts["http://b:2"], 2);
            assert_eq!(counts["http://c:3"], 1);
        }
    }

    #[test]
    fn single_candidate_returns_directly() {
        let balancer = balancer("/api", &[("http://a:1", 80), ("http://b:2", 20)]);
        let context = ctx("/api", "");
        // A canary filter narrowed the candidates to one target.
        let narrowed = targets(&["http://b:2"]);
        for _ in 0..5 {
            assert_eq!(
                balancer.select_target(&narrowed, &context).unwrap(),
                "http://b:2"
            );
        }
    }

    #[test]
    fn narrowed_candidates_keep_relative_weights() {
        let balancer = balancer(
            "/api",
            &[("http://a:1", 4), ("http://b:2", 2), ("http://c:3", 2)],
        );
        let context = ctx("/api", "");
        let narrowed = targets(&["http://b:2", "http://c:3"]);

        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..8 {
            let pick = balancer.select_target(&narrowed, &context).unwrap();
            *counts.entry(pick).or_default() += 1;
        }
        assert_eq!(counts["http://b:2"], 4);
        assert_eq!(counts["http://c:3"], 4);
        assert!(!counts.contains_key("http://a:1"));
    }

    #[test]
    fn empty_candidates_yield_none() {
        let balancer = balancer("/api", &[("http://a:1", 1)]);
        assert!(balancer.select_target(&[], &ctx("/api", "")).is_none());
    }

    #[test]
    fn unknown_path_yields_none() {
        let balancer = balancer("/api", &[("http://a:1", 1)]);
        let unknown = targets(&["http://a:1", "http://x:9"]);
        assert!(balancer.select_target(&unknown, &ctx("/other", "")).is_none());
    }

    #[test]
    fn zero_total_weight_yields_none() {
        let balancer = balancer("/api", &[("http://a:1", 0), ("http://b:2", 0)]);
        let candidates = targets(&["http://a:1", "http://b:2"]);
        assert!(balancer.select_target(&candidates, &ctx("/api", "")).is_none());
    }
}
