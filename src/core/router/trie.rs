//! Character-trie resolver for literal path patterns.
use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::config::models::{RouteEngine, RoutingRule};
use crate::core::router::{normalize_path, RouteResolver};

#[derive(Default)]
struct TrieNode {
    children: HashMap<char, TrieNode>,
    rules: Option<Arc<Vec<RoutingRule>>>,
    is_end: bool,
}

/// Exact-match trie over normalized pattern characters.
///
/// Search walks the characters of the incoming path; a missing child or a
/// terminus that is not an end marker is a miss. Partial prefixes never
/// match. Lookup is O(|path|).
pub struct TrieResolver {
    root: TrieNode,
}

impl TrieResolver {
    pub fn new() -> Self {
        Self {
            root: TrieNode::default(),
        }
    }

    pub fn from_rules(rules: &IndexMap<String, Vec<RoutingRule>>) -> Self {
        let mut resolver = Self::new();
        for (pattern, rule_list) in rules {
            resolver.insert(pattern, rule_list.clone());
        }
        resolver
    }

    pub fn insert(&mut self, pattern: &str, rules: Vec<RoutingRule>) {
        let normalized = normalize_path(pattern);
        let mut node = &mut self.root;
        for ch in normalized.chars() {
            node = node.children.entry(ch).or_default();
        }
        node.rules = Some(Arc::new(rules));
        node.is_end = true;
        tracing::info!(pattern = %pattern, "route inserted into trie");
    }

    fn search(&self, path: &str) -> Option<Arc<Vec<RoutingRule>>> {
        let mut node = &self.root;
        for ch in normalize_path(path).chars() {
            node = node.children.get(&ch)?;
        }
        if node.is_end {
            node.rules.clone()
        } else {
            None
        }
    }
}

impl Default for TrieResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl RouteResolver for TrieResolver {
    fn resolve(&self, path: &str) -> Option<Arc<Vec<RoutingRule>>> {
        self.search(path)
    }

    fn engine(&self) -> RouteEngine {
        RouteEngine::Trie
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::router::test_rules;

    fn resolver_with(patterns: &[&str]) -> TrieResolver {
        let mut resolver = TrieResolver::new();
        for p in patterns {
            resolver.insert(p, test_rules(&["http://127.0.0.1:8081"]));
        }
        resolver
    }

    #[test]
    fn exact_match_only() {
        let resolver = resolver_with(&["/api/v1/user"]);

        assert!(resolver.resolve("/api/v1/user").is_some());
        // Partial prefixes do not match.
        assert!(resolver.resolve("/api/v1/use").is_none());
        assert!(resolver.resolve("/api/v1").is_none());
        // Longer paths do not match either.
        assert!(resolver.resolve("/api/v1/user/42").is_none());
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let resolver = resolver_with(&["/api/v1/user"]);
        assert!(resolver.resolve("/api/v1/user/").is_some());
        assert!(resolver.resolve("/api/v1/user//").is_some());
    }

    #[test]
    fn intermediate_node_is_not_terminal() {
        let resolver = resolver_with(&["/api/v1/user", "/api/v1/userinfo"]);
        assert!(resolver.resolve("/api/v1/user").is_some());
        assert!(resolver.resolve("/api/v1/userinfo").is_some());
        assert!(resolver.resolve("/api/v1/userinf").is_none());
    }

    #[test]
    fn resolution_is_deterministic() {
        let resolver = resolver_with(&["/api/v1/order"]);
        let first = resolver.resolve("/api/v1/order").unwrap();
        let second = resolver.resolve("/api/v1/order").unwrap();
        assert_eq!(*first, *second);
    }

    #[test]
    fn rule_order_is_preserved() {
        let mut resolver = TrieResolver::new();
        resolver.insert(
            "/api/v1/user",
            test_rules(&["http://a:1", "http://b:2", "http://c:3"]),
        );
        let rules = resolver.resolve("/api/v1/user").unwrap();
        let targets: Vec<&str> = rules.iter().map(|r| r.target.as_str()).collect();
        assert_eq!(targets, vec!["http://a:1", "http://b:2", "http://c:3"]);
    }
}
