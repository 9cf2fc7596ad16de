//! Anchored-regex resolver.
use std::sync::Arc;

use indexmap::IndexMap;
use regex::Regex;

use crate::config::models::{RouteEngine, RoutingRule};
use crate::core::router::{expand_wildcard, normalize_path, RouteResolver};

pub(crate) struct CompiledPattern {
    pub regex: Regex,
    pub rules: Arc<Vec<RoutingRule>>,
}

/// Scans registered patterns in insertion order and returns the first match.
///
/// Every pattern is compiled with implicit `^…$` anchors over the normalized
/// path, so `users` never matches `/users/123`. An invalid pattern is logged
/// and skipped.
pub struct RegexResolver {
    patterns: Vec<CompiledPattern>,
}

impl RegexResolver {
    pub fn new() -> Self {
        Self {
            patterns: Vec::new(),
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
        if let Some(compiled) = compile_anchored(pattern) {
            self.patterns.push(CompiledPattern {
                regex: compiled,
                rules: Arc::new(rules),
            });
            tracing::info!(pattern = %pattern, "route registered in regex set");
        }
    }

    pub(crate) fn scan(&self, normalized: &str) -> Option<Arc<Vec<RoutingRule>>> {
        self.patterns
            .iter()
            .find(|p| p.regex.is_match(normalized))
            .map(|p| p.rules.clone())
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

impl Default for RegexResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Compile `pattern` with `^…$` anchors over its normalized form, returning
/// `None` (after logging) when the expression is invalid.
pub(crate) fn compile_anchored(pattern: &str) -> Option<Regex> {
    let body = expand_wildcard(pattern);
    let normalized = normalize_path(&body);
    match Regex::new(&format!("^{normalized}$")) {
        Ok(regex) => Some(regex),
        Err(err) => {
            tracing::error!(pattern = %pattern, error = %err, "invalid regex pattern, skipping");
            None
        }
    }
}

impl RouteResolver for RegexResolver {
    fn resolve(&self, path: &str) -> Option<Arc<Vec<RoutingRule>>> {
        self.scan(normalize_path(path))
    }

    fn engine(&self) -> RouteEngine {
        RouteEngine::Regexp
    }
}
