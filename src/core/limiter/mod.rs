//! Admission-control kernels.
//!
//! One limiter instance guards the whole process. The token bucket is a
//! pure reservation scheduler; the leaky bucket owns a background leak task
//! and therefore needs an explicit teardown at shutdown or reload.
mod leaky_bucket;
mod token_bucket;

pub use leaky_bucket::LeakyBucket;
pub use token_bucket::TokenBucket;

use crate::config::models::{RateLimitAlgorithm, RateLimitConfig};

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    /// Throttled; for the token bucket, how long the caller would have had
    /// to wait for its grant.
    Throttled { wait_ms: u64 },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed)
    }
}

/// The configured limiter algorithm behind one admission interface.
pub enum RateLimiter {
    Token(TokenBucket),
    Leaky(LeakyBucket),
}

impl RateLimiter {
    pub fn from_config(config: &RateLimitConfig) -> Self {
        match config.algorithm {
            RateLimitAlgorithm::TokenBucket => {
                Self::Token(TokenBucket::new(config.qps, config.burst))
            }
            RateLimitAlgorithm::LeakyBucket => {
                Self::Leaky(LeakyBucket::start(config.qps, config.burst))
            }
        }
    }

    pub fn admit(&self) -> Admission {
        match self {
            RateLimiter::Token(bucket) => bucket.admit(),
            RateLimiter::Leaky(bucket) => bucket.admit(),
        }
    }

    /// Stop any background task owned by the limiter. Called at shutdown and
    /// when a reload replaces the instance.
    pub fn teardown(&self) {
        if let RateLimiter::Leaky(bucket) = self {
            bucket.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_the_configured_algorithm() {
        let token = RateLimiter::from_config(&RateLimitConfig {
            enabled: true,
            qps: 10,
            burst: 5,
            algorithm: RateLimitAlgorithm::TokenBucket,
        });
        assert!(matches!(token, RateLimiter::Token(_)));
        token.teardown();
    }

    #[tokio::test]
    async fn leaky_variant_tears_down() {
        let leaky = RateLimiter::from_config(&RateLimitConfig {
            enabled: true,
            qps: 10,
            burst: 5,
            algorithm: RateLimitAlgorithm::LeakyBucket,
        });
        assert!(leaky.admit().is_allowed());
        leaky.teardown();
    }
}
