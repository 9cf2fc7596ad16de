//! Startup / reload validation of a configuration snapshot.
//!
//! A snapshot that fails validation is fatal at startup (the process exits
//! with status 1) and rejected at reload time (the previous snapshot stays
//! active). Checks that are per-pattern rather than per-snapshot (an invalid
//! regex under a regex-capable engine) are not handled here; the resolver
//! logs and skips those at build time.
use thiserror::Error;

use crate::config::models::{GatewayConfig, Protocol};

/// Characters that mark a path pattern as a regular expression.
const REGEX_METACHARACTERS: &[char] = &[
    '.', '*', '+', '?', '(', ')', '|', '[', ']', '^', '$', '\\',
];

#[derive(Debug, Error, Clone)]
pub enum ValidationError {
    #[error("routing rules are empty and the consul balancer is not enabled")]
    EmptyRules,

    #[error(
        "engine '{engine}' cannot serve regex pattern '{pattern}'; use 'trie_regexp' or 'regexp'"
    )]
    RegexUnderExactEngine { engine: String, pattern: String },

    #[error("rule for '{pattern}' has an empty target")]
    EmptyTarget { pattern: String },

    #[error("http rule target '{target}' must start with http:// or https://")]
    InvalidHttpTarget { target: String },

    #[error("rate limit {field} must be greater than zero")]
    InvalidRateLimit { field: &'static str },

    #[error("breaker error_rate {value} is outside [0, 1]")]
    InvalidErrorRate { value: f64 },

    #[error("breaker {field} must be greater than zero")]
    InvalidBreaker { field: &'static str },

    #[error("validation failed:\n{0}")]
    Multiple(String),
}

/// Returns true when `pattern` contains regex metacharacters and therefore
/// cannot be served by an exact-match engine.
pub fn is_regex_pattern(pattern: &str) -> bool {
    pattern.contains(REGEX_METACHARACTERS)
}

/// Validate a whole snapshot, collecting every violation before reporting.
pub fn validate(config: &GatewayConfig) -> Result<(), ValidationError> {
    let mut errors = Vec::new();

    if config.routing.rules.is_empty() && !config.consul.enabled {
        errors.push(ValidationError::EmptyRules);
    }

    for (pattern, rules) in &config.routing.rules {
        if is_regex_pattern(pattern) && !config.routing.engine.supports_regex() {
            errors.push(ValidationError::RegexUnderExactEngine {
                engine: config.routing.engine.as_str().to_string(),
                pattern: pattern.clone(),
            });
        }
        for rule in rules {
            if rule.target.is_empty() {
                errors.push(ValidationError::EmptyTarget {
                    pattern: pattern.clone(),
                });
                continue;
            }
            if rule.protocol == Protocol::Http
                && !rule.target.starts_with("http://")
                && !rule.target.starts_with("https://")
            {
                errors.push(ValidationError::InvalidHttpTarget {
                    target: rule.target.clone(),
                });
            }
        }
    }

    if config.middleware.rate_limit && config.traffic.rate_limit.enabled {
        if config.traffic.rate_limit.qps == 0 {
            errors.push(ValidationError::InvalidRateLimit { field: "qps" });
        }
        if config.traffic.rate_limit.burst == 0 {
            errors.push(ValidationError::InvalidRateLimit { field: "burst" });
        }
    }

    if config.middleware.breaker && config.traffic.breaker.enabled {
        let breaker = &config.traffic.breaker;
        if !(0.0..=1.0).contains(&breaker.error_rate) {
            errors.push(ValidationError::InvalidErrorRate {
                value: breaker.error_rate,
            });
        }
        if breaker.timeout_ms == 0 {
            errors.push(ValidationError::InvalidBreaker { field: "timeout_ms" });
        }
        if breaker.max_concurrent == 0 {
            errors.push(ValidationError::InvalidBreaker {
                field: "max_concurrent",
            });
        }
        if breaker.window_duration_secs == 0 {
            errors.push(ValidationError::InvalidBreaker {
                field: "window_duration_secs",
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else if errors.len() == 1 {
        Err(errors.remove(0))
    } else {
        Err(ValidationError::Multiple(
            errors
                .iter()
                .map(|e| format!("  - {e}"))
                .collect::<Vec<_>>()
                .join("\n"),
        ))
    }
}
