//! Lock-free round-robin policy.
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::models::BalancerKind;
use crate::core::balancer::{LoadBalancer, SelectionContext};

/// Cycles through the candidate slice with a single atomic counter.
pub struct RoundRobinBalancer {
    counter: AtomicU64,
}

impl RoundRobinBalancer {
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }
}

impl Default for RoundRobinBalancer {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadBalancer for RoundRobinBalancer {
    fn select_target(&self, candidates: &[String], _ctx: &SelectionContext) -> Option<String> {
        if candidates.is_empty() {
            return None;
        }
        let count = self.counter.fetch_add(1, Ordering::Relaxed);
        Some(candidates[(count % candidates.len() as u64) as usize].clone())
    }

    fn kind(&self) -> BalancerKind {
        BalancerKind::RoundRobin
    }

    fn active_targets(&self) -> Vec<String> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use super::*;
    use crate::core::balancer::test_support::{ctx, targets};

    #[test]
    fn cycles_in_order() {
        let balancer = RoundRobinBalancer::new();
        let candidates = targets(&["http://a:1", "http://b:2", "http://c:3"]);
        let context = ctx("/api", "10.0.0.1:1234");

        let picks: Vec<String> = (0..4)
            .map(|_| balancer.select_target(&candidates, &context).unwrap())
            .collect();
        assert_eq!(picks, vec!["http://a:1", "http://b:2", "http://c:3", "http://a:1"]);
    }

    #[test]
    fn empty_candidates_yield_none() {
        let balancer = RoundRobinBalancer::new();
        assert!(balancer.select_target(&[], &ctx("/api", "")).is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn distribution_is_even_under_concurrency() {
        let balancer = Arc::new(RoundRobinBalancer::new());
        let candidates = Arc::new(targets(&["http://a:1", "http://b:2", "http://c:3"]));

        const CALLERS: usize = 8;
        const PER_CALLER: usize = 300;

        let mut handles = Vec::new();
        for _ in 0..CALLERS {
            let balancer = balancer.clone();
            let candidates = candidates.clone();
            handles.push(tokio::spawn(async move {
                let context = ctx("/api", "10.0.0.1:1234");
                let mut counts: HashMap<String, usize> = HashMap::new();
                for _ in 0..PER_CALLER {
                    let pick = balancer.select_target(&candidates, &context).unwrap();
                    *counts.entry(pick).or_default() += 1;
                }
                counts
            }));
        }

        let mut totals: HashMap<String, usize> = HashMap::new();
        for handle in handles {
            for (target, count) in handle.await.unwrap() {
                *totals.entry(target).or_default() += count;
            }
        }

        // M calls over N targets: each target gets floor(M/N) or ceil(M/N).
        let total = CALLERS * PER_CALLER;
        let floor = total / candidates.len();
        let ceil = floor + usize::from(total % candidates.len() != 0);
        for target in candidates.iter() {
            let count = totals[target];
            assert!(
                count == floor || count == ceil,
                "target {target} selected {count} times, expected {floor} or {ceil}"
            );
        }
    }
}
