//! Per-route circuit breaking.
//!
//! Each configured route pattern gets a named command carrying a timeout, a
//! concurrency cap, a minimum request volume and an error-rate trip
//! threshold. A request runs inside its command: an open circuit, an
//! exhausted concurrency cap or a timeout short-circuits to the 503
//! fallback. Outcomes feed a per-route time-sliding window; a background
//! pruner trims the windows every second and exports rolling error-rate and
//! latency gauges.
mod window;

pub use window::{RequestStat, SlidingWindow};

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::config::models::BreakerConfig;
use crate::metrics;

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

/// Why a command refused to run its inner future.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerRejection {
    CircuitOpen,
    ConcurrencyCap,
    Timeout,
}

/// Result of running a request through a command.
pub enum CommandOutcome<T> {
    /// Inner future completed; caller still decides success from its value.
    Completed(T),
    /// Short-circuited; the fallback response applies.
    Rejected(BreakerRejection),
}

struct BreakerState {
    state: AtomicU8,
    opened_at: Mutex<Option<Instant>>,
    half_open_probes: AtomicU64,
}

/// A named breaker command for one route pattern.
pub struct BreakerCommand {
    name: String,
    timeout: Duration,
    sleep_window: Duration,
    error_rate: f64,
    min_requests: u64,
    permits: Semaphore,
    state: BreakerState,
    window: SlidingWindow,
}

impl BreakerCommand {
    fn new(name: String, config: &BreakerConfig) -> Self {
        Self {
            name,
            timeout: Duration::from_millis(config.timeout_ms),
            sleep_window: Duration::from_millis(config.sleep_window_ms),
            error_rate: config.error_rate,
            min_requests: config.min_requests,
            permits: Semaphore::new(config.max_concurrent),
            state: BreakerState {
                state: AtomicU8::new(STATE_CLOSED),
                opened_at: Mutex::new(None),
                half_open_probes: AtomicU64::new(0),
            },
            window: SlidingWindow::new(Duration::from_secs(config.window_duration_secs)),
        }
    }

    /// Run `fut` under the command's guards. `is_success` classifies the
    /// completed value; the window and trip state are updated either way.
    pub async fn run<T, F>(
        &self,
        fut: F,
        is_success: impl FnOnce(&T) -> bool,
    ) -> CommandOutcome<T>
    where
        F: Future<Output = T>,
    {
        if !self.try_enter() {
            metrics::increment_breaker_trip(&self.name);
            tracing::warn!(route = %self.name, "circuit open, request short-circuited");
            return CommandOutcome::Rejected(BreakerRejection::CircuitOpen);
        }

        let permit = match self.permits.try_acquire() {
            Ok(permit) => permit,
            Err(_) => {
                metrics::increment_breaker_trip(&self.name);
                tracing::warn!(route = %self.name, "concurrency cap reached");
                return CommandOutcome::Rejected(BreakerRejection::ConcurrencyCap);
            }
        };

        let start = Instant::now();
        let result = tokio::time::timeout(self.timeout, fut).await;
        drop(permit);
        let latency = start.elapsed();

        match result {
            Ok(value) => {
                let success = is_success(&value);
                self.record_outcome(success, latency);
                CommandOutcome::Completed(value)
            }
            Err(_) => {
                self.record_outcome(false, latency);
                metrics::increment_breaker_trip(&self.name);
                tracing::warn!(route = %self.name, timeout_ms = self.timeout.as_millis() as u64,
                    "request timed out inside breaker command");
                CommandOutcome::Rejected(BreakerRejection::Timeout)
            }
        }
    }

    /// Gate keeping: closed passes, open passes one probe per sleep window.
    fn try_enter(&self) -> bool {
        match self.state.state.load(Ordering::Acquire) {
            STATE_CLOSED => true,
            STATE_HALF_OPEN => {
                // Only the first caller in the half-open phase probes.
                self.state.half_open_probes.fetch_add(1, Ordering::AcqRel) == 0
            }
            _ => {
                let opened_at = {
                    let guard = match self.state.opened_at.lock() {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    *guard
                };
                match opened_at {
                    Some(at) if at.elapsed() >= self.sleep_window => {
                        self.state.state.store(STATE_HALF_OPEN, Ordering::Release);
                        self.state.half_open_probes.store(1, Ordering::Release);
                        true
                    }
                    _ => false,
                }
            }
        }
    }

    fn record_outcome(&self, success: bool, latency: Duration) {
        self.window.record(success, latency);

        match self.state.state.load(Ordering::Acquire) {
            STATE_HALF_OPEN => {
                if success {
                    self.close();
                    tracing::info!(route = %self.name, "circuit closed after successful probe");
                } else {
                    self.open();
                }
            }
            STATE_CLOSED => {
                if self.should_trip() {
                    self.open();
                    tracing::warn!(route = %self.name,
                        error_rate = self.window.error_rate(),
                        "circuit tripped open");
                }
            }
            _ => {}
        }
    }

    /// Error-rate trip: enough volume and rate above a non-zero threshold.
    fn should_trip(&self) -> bool {
        if self.error_rate <= 0.0 {
            return false;
        }
        (self.window.len() as u64) >= self.min_requests
            && self.window.error_rate() >= self.error_rate
    }

    fn open(&self) {
        self.state.state.store(STATE_OPEN, Ordering::Release);
        let mut guard = match self.state.opened_at.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(Instant::now());
    }

    fn close(&self) {
        self.state.state.store(STATE_CLOSED, Ordering::Release);
        let mut guard = match self.state.opened_at.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = None;
    }

    pub fn is_open(&self) -> bool {
        self.state.state.load(Ordering::Acquire) == STATE_OPEN
    }

    pub fn window(&self) -> &SlidingWindow {
        &self.window
    }
}

/// All breaker commands for the active configuration, plus their pruner.
pub struct BreakerRegistry {
    commands: HashMap<String, Arc<BreakerCommand>>,
    stop: CancellationToken,
}

impl BreakerRegistry {
    /// Build one command per route pattern and start the window pruner.
    pub fn start(patterns: impl IntoIterator<Item = String>, config: &BreakerConfig) -> Self {
        let commands: HashMap<String, Arc<BreakerCommand>> = patterns
            .into_iter()
            .map(|pattern| {
                let command = Arc::new(BreakerCommand::new(pattern.clone(), config));
                (pattern, command)
            })
            .collect();

        let stop = CancellationToken::new();
        let pruner_commands: Vec<(String, Arc<BreakerCommand>)> = commands
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let pruner_stop = stop.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = pruner_stop.cancelled() => return,
                    _ = ticker.tick() => {
                        for (route, command) in &pruner_commands {
                            command.window.prune();
                            metrics::set_route_error_rate(route, command.window.error_rate());
                            metrics::set_route_avg_latency(route, command.window.avg_latency());
                        }
                    }
                }
            }
        });

        Self { commands, stop }
    }

    pub fn command(&self, pattern: &str) -> Option<Arc<BreakerCommand>> {
        self.commands.get(pattern).cloned()
    }

    /// Stop the pruner task. Called on shutdown and reload swap-out.
    pub fn teardown(&self) {
        self.stop.cancel();
    }
}

impl Drop for BreakerRegistry {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}
