//! Host-framework longest-prefix resolver.
use std::sync::Arc;

use indexmap::IndexMap;

use crate::config::models::{RouteEngine, RoutingRule};
use crate::core::router::{normalize_path, RouteResolver};

/// Longest-prefix matching over literal patterns, the way the embedding
/// router resolves mounts. Unlike the trie this engine matches any path
/// under a registered prefix, so `/api` serves `/api/v1/user` too.
pub struct PrefixResolver {
    // (normalized pattern, rules), longest patterns first.
    entries: Vec<(String, Arc<Vec<RoutingRule>>)>,
}

impl PrefixResolver {
    pub fn from_rules(rules: &IndexMap<String, Vec<RoutingRule>>) -> Self {
        let mut entries: Vec<(String, Arc<Vec<RoutingRule>>)> = rules
            .iter()
            .map(|(pattern, rule_list)| {
                (
                    normalize_path(pattern).to_string(),
                    Arc::new(rule_list.clone()),
                )
            })
            .collect();
        entries.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        Self { entries }
    }

    fn matches(prefix: &str, path: &str) -> bool {
        if prefix.is_empty() {
            return true;
        }
        match path.strip_prefix(prefix) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }
}

impl RouteResolver for PrefixResolver {
    fn resolve(&self, path: &str) -> Option<Arc<Vec<RoutingRule>>> {
        let normalized = normalize_path(path);
        self.entries
            .iter()
            .find(|(prefix, _)| Self::matches(prefix, normalized))
            .map(|(_, rules)| rules.clone())
    }

    fn engine(&self) -> RouteEngine {
        RouteEngine::Prefix
    }
}
