//! Token-bucket admission scheduler.
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::core::limiter::Admission;

struct BucketState {
    tokens: f64,
    last: Instant,
}

/// Token bucket issuing `qps` tokens per second with burst capacity `burst`.
///
/// The bucket starts full. `take` never sleeps: it refills from elapsed
/// time, consumes one token when available and returns the grant timestamp.
/// A grant in the future means the caller has been throttled; the middleware
/// rejects such requests rather than delaying them, so over any one-second
/// interval at most `qps + burst` requests are admitted. Throttled calls do
/// not consume capacity.
pub struct TokenBucket {
    qps: u32,
    burst: u32,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(qps: u32, burst: u32) -> Self {
        let limiter = Self {
            qps: qps.max(1),
            burst,
            state: Mutex::new(BucketState {
                tokens: f64::from(burst),
                last: Instant::now(),
            }),
        };
        tracing::info!(qps, burst, "token bucket limiter initialized");
        limiter
    }

    pub fn qps(&self) -> u32 {
        self.qps
    }

    pub fn burst(&self) -> u32 {
        self.burst
    }

    /// Acquire one token, returning the timestamp at which the token is (or
    /// would have been) granted.
    pub fn take(&self) -> Instant {
        let now = Instant::now();
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let elapsed = now.saturating_duration_since(state.last).as_secs_f64();
        state.tokens = (state.tokens + elapsed * f64::from(self.qps)).min(f64::from(self.burst));
        state.last = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            now
        } else {
            let wait_secs = (1.0 - state.tokens) / f64::from(self.qps);
            now + Duration::from_secs_f64(wait_secs)
        }
    }

    /// Admit iff the grant required no wait.
    pub fn admit(&self) -> Admission {
        let now = Instant::now();
        let granted = self.take();
        if granted > now {
            Admission::Throttled {
                wait_ms: granted.duration_since(now).as_millis().max(1) as u64,
            }
        } else {
            Admission::Allowed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_is_admitted_then_throttled() {
        let bucket = TokenBucket::new(5, 5);

        let mut admitted = 0;
        let mut throttled = 0;
        for _ in 0..20 {
            match bucket.admit() {
                Admission::Allowed => admitted += 1,
                Admission::Throttled { wait_ms } => {
                    assert!(wait_ms > 0);
                    throttled += 1;
                }
            }
        }
        assert_eq!(admitted, 5);
        assert_eq!(throttled, 15);
    }

    #[test]
    fn admission_bound_over_one_second() {
        let qps = 50u32;
        let burst = 10u32;
        let bucket = TokenBucket::new(qps, burst);
        let start = Instant::now();

        let mut admitted = 0u32;
        while start.elapsed() < Duration::from_secs(1) {
            if bucket.admit().is_allowed() {
                admitted += 1;
            }
            std::thread::sleep(Duration::from_micros(200));
        }
        assert!(
            admitted <= qps + burst + 1,
            "admitted {admitted}, bound {}",
            qps + burst
        );
    }

    #[test]
    fn tokens_refill_over_time() {
        let bucket = TokenBucket::new(1000, 2);
        assert!(bucket.admit().is_allowed());
        assert!(bucket.admit().is_allowed());
        assert!(!bucket.admit().is_allowed());

        // 1000 qps refills a token every millisecond.
        std::thread::sleep(Duration::from_millis(5));
        assert!(bucket.admit().is_allowed());
    }

    #[test]
    fn refill_never_exceeds_burst() {
        let bucket = TokenBucket::new(1000, 3);
        std::thread::sleep(Duration::from_millis(20));
        let mut admitted = 0;
        for _ in 0..10 {
            if bucket.admit().is_allowed() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 3);
    }

    #[test]
    fn throttled_grant_is_in_the_future() {
        let bucket = TokenBucket::new(2, 1);
        let _ = bucket.take();
        let before = Instant::now();
        let granted = bucket.take();
        assert!(granted > before);
    }
}
