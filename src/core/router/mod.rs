//! Route-matching engines.
//!
//! Four engines sit behind the [`RouteResolver`] trait: a character trie
//! (exact matches only), an anchored-regex scanner, a hybrid of the two
//! (trie first, regex fallback), and the host-framework longest-prefix
//! matcher. All engines normalize incoming paths the same way: one leading
//! `/` stripped, trailing `/` trimmed. Resolution is deterministic and
//! side-effect-free for a fixed rule set.
mod hybrid;
mod prefix;
mod regex_set;
mod trie;

pub use hybrid::HybridResolver;
pub use prefix::PrefixResolver;
pub use regex_set::RegexResolver;
pub use trie::TrieResolver;

use std::sync::Arc;

use indexmap::IndexMap;

use crate::config::models::{RouteEngine, RoutingRule};

/// Resolves a request path to the ordered rule list registered for the
/// matching pattern, or `None` when no pattern matches.
pub trait RouteResolver: Send + Sync + 'static {
    fn resolve(&self, path: &str) -> Option<Arc<Vec<RoutingRule>>>;

    /// Engine identifier for logs and the status surface.
    fn engine(&self) -> RouteEngine;
}

/// Strip one leading `/` and trim trailing `/` characters.
///
/// Normalization is applied uniformly across every engine so that
/// `/api/v1/user/` and `/api/v1/user` resolve identically.
pub fn normalize_path(path: &str) -> &str {
    path.strip_prefix('/').unwrap_or(path).trim_end_matches('/')
}

/// Translate a trailing `*name` wildcard segment into its regex form.
///
/// `/files/*rest` becomes `/files/.+`, matching any non-empty suffix. The
/// pattern is returned unchanged when it carries no wildcard tail.
pub fn expand_wildcard(pattern: &str) -> String {
    match pattern.rsplit_once('/') {
        Some((head, last)) if last.len() > 1 && last.starts_with('*') => {
            format!("{}/{}", regex::escape(normalize_path(head)), ".+")
        }
        _ => pattern.to_string(),
    }
}

/// Build the resolver selected by the configuration.
///
/// Engine/pattern compatibility is enforced earlier by config validation;
/// at this point an invalid regex pattern under a regex-capable engine is
/// logged and skipped rather than failing the build.
pub fn build_resolver(
    engine: RouteEngine,
    rules: &IndexMap<String, Vec<RoutingRule>>,
) -> Arc<dyn RouteResolver> {
    match engine {
        RouteEngine::Trie => Arc::new(TrieResolver::from_rules(rules)),
        RouteEngine::TrieRegexp => Arc::new(HybridResolver::from_rules(rules)),
        RouteEngine::Regexp => Arc::new(RegexResolver::from_rules(rules)),
        RouteEngine::Prefix => Arc::new(PrefixResolver::from_rules(rules)),
    }
}

#[cfg(test)]
pub(crate) fn test_rules(targets: &[&str]) -> Vec<RoutingRule> {
    use crate::config::models::Protocol;

    targets
        .iter()
        .map(|t| RoutingRule {
            target: (*t).to_string(),
            weight: 1,
            env: None,
            protocol: Protocol::Http,
            health_check_path: "/health".to_string(),
        })
        .collect()
}
