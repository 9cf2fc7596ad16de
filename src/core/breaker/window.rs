//! Time-based sliding window of request outcomes.
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// One recorded request outcome.
#[derive(Debug, Clone, Copy)]
pub struct RequestStat {
    pub success: bool,
    pub latency: Duration,
    pub timestamp: Instant,
}

/// Append-only outcome list pruned to `duration` by a periodic sweep.
///
/// Writers append after every call; the registry's pruner calls `prune`
/// every second. Reads compute rolling aggregates over whatever entries are
/// currently retained.
pub struct SlidingWindow {
    entries: RwLock<Vec<RequestStat>>,
    duration: Duration,
}

impl SlidingWindow {
    pub fn new(duration: Duration) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            duration,
        }
    }

    pub fn record(&self, success: bool, latency: Duration) {
        let mut entries = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.push(RequestStat {
            success,
            latency,
            timestamp: Instant::now(),
        });
    }

    /// Drop entries older than the window duration.
    pub fn prune(&self) {
        let now = Instant::now();
        let mut entries = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.retain(|stat| now.duration_since(stat.timestamp) <= self.duration);
    }

    /// Failed / total over the retained entries; 0.0 when empty.
    pub fn error_rate(&self) -> f64 {
        let entries = match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if entries.is_empty() {
            return 0.0;
        }
        let failed = entries.iter().filter(|s| !s.success).count();
        failed as f64 / entries.len() as f64
    }

    /// Mean latency over the retained entries; zero when empty.
    pub fn avg_latency(&self) -> Duration {
        let entries = match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if entries.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = entries.iter().map(|s| s.latency).sum();
        total / entries.len() as u32
    }

    pub fn len(&self) -> usize {
        match self.entries.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_rate_over_mixed_outcomes() {
        let window = SlidingWindow::new(Duration::from_secs(10));
        window.record(true, Duration::from_millis(10));
        window.record(false, Duration::from_millis(20));
        window.record(false, Duration::from_millis(30));
        window.record(true, Duration::from_millis(40));

        assert!((window.error_rate() - 0.5).abs() < f64::EPSILON);
        assert_eq!(window.avg_latency(), Duration::from_millis(25));
    }

    #[test]
    fn empty_window_reports_zero() {
        let window = SlidingWindow::new(Duration::from_secs(10));
        assert_eq!(window.error_rate(), 0.0);
        assert_eq!(window.avg_latency(), Duration::ZERO);
        assert!(window.is_empty());
    }

    #[test]
    fn prune_drops_expired_entries() {
        let window = SlidingWindow::new(Duration::from_millis(50));
        window.record(false, Duration::from_millis(1));
        assert_eq!(window.len(), 1);

        std::thread::sleep(Duration::from_millis(80));
        window.record(true, Duration::from_millis(1));
        window.prune();

        assert_eq!(window.len(), 1);
        assert_eq!(window.error_rate(), 0.0);
    }
}
