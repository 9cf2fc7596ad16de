//! Hybrid trie + regex resolver.
use std::sync::Arc;

use indexmap::IndexMap;

use crate::config::models::{RouteEngine, RoutingRule};
use crate::config::validation::is_regex_pattern;
use crate::core::router::{RegexResolver, RouteResolver, TrieResolver};

/// Trie lookup first, anchored-regex scan as the fallback.
///
/// Literal patterns (and nothing else) land in the trie; patterns carrying
/// regex metacharacters or a trailing `*name` wildcard go to the regex set.
/// The fast path therefore stays O(|path|) for the common literal case.
pub struct HybridResolver {
    trie: TrieResolver,
    regexes: RegexResolver,
}

impl HybridResolver {
    pub fn new() -> Self {
        Self {
            trie: TrieResolver::new(),
            regexes: RegexResolver::new(),
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
        if is_regex_pattern(pattern) || has_wildcard_tail(pattern) {
            self.regexes.insert(pattern, rules);
        } else {
            self.trie.insert(pattern, rules);
        }
    }
}

fn has_wildcard_tail(pattern: &str) -> bool {
    matches!(
        pattern.rsplit_once('/'),
        Some((_, last)) if last.len() > 1 && last.starts_with('*')
    )
}

impl Default for HybridResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl RouteResolver for HybridResolver {
    fn resolve(&self, path: &str) -> Option<Arc<Vec<RoutingRule>>> {
        self.trie.resolve(path).or_else(|| self.regexes.resolve(path))
    }

    fn engine(&self) -> RouteEngine {
        RouteEngine::TrieRegexp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::router::test_rules;

    #[test]
    fn literal_patterns_take_the_trie_path() {
        let mut resolver = HybridResolver::new();
        resolver.insert("/api/v1/user", test_rules(&["http://literal:1"]));
        resolver.insert("/api/v\\d+/user", test_rules(&["http://regex:2"]));

        // The literal hits the trie even though the regex would also match.
        let rules = resolver.resolve("/api/v1/user").unwrap();
        assert_eq!(rules[0].target, "http://literal:1");

        // Non-literal versions fall through to the regex set.
        let rules = resolver.resolve("/api/v7/user").unwrap();
        assert_eq!(rules[0].target, "http://regex:2");
    }

    #[test]
    fn miss_in_both_layers() {
        let mut resolver = HybridResolver::new();
        resolver.insert("/api/v1/user", test_rules(&["http://a:1"]));
        assert!(resolver.resolve("/api/v2/other").is_none());
    }

    #[test]
    fn wildcard_tail_matches_any_suffix() {
        let mut resolver = HybridResolver::new();
        resolver.insert("/files/*rest", test_rules(&["http://files:1"]));

        assert!(resolver.resolve("/files/a").is_some());
        assert!(resolver.resolve("/files/a/b/c.txt").is_some());
        // The suffix must be non-empty.
        assert!(resolver.resolve("/files").is_none());
        assert!(resolver.resolve("/files/").is_none());
    }

    #[test]
    fn trailing_slash_consistency_across_layers() {
        let mut resolver = HybridResolver::new();
        resolver.insert("/api/v1/user", test_rules(&["http://a:1"]));
        resolver.insert("/api/v\\d+/order", test_rules(&["http://b:2"]));

        assert!(resolver.resolve("/api/v1/user/").is_some());
        assert!(resolver.resolve("/api/v3/order/").is_some());
    }
}
