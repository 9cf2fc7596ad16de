//! Leaky-bucket admission queue.
use tokio::sync::mpsc;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::core::limiter::Admission;

/// Bounded queue of capacity `burst` drained at rate `qps` by a background
/// leak task.
///
/// Admission is a non-blocking enqueue: a full queue means 429. The leak
/// task removes at most one entry per tick (non-blocking dequeue, so a tick
/// racing an empty queue is harmless) and exits when the stop token fires,
/// within one tick period.
pub struct LeakyBucket {
    qps: u32,
    burst: u32,
    queue_tx: mpsc::Sender<()>,
    stop: CancellationToken,
}

impl LeakyBucket {
    /// Create the bucket and spawn its leak task.
    pub fn start(qps: u32, burst: u32) -> Self {
        let qps = qps.max(1);
        let burst = burst.max(1);
        let (queue_tx, queue_rx) = mpsc::channel(burst as usize);
        let stop = CancellationToken::new();

        let leak_stop = stop.clone();
        tokio::spawn(leak_loop(qps, queue_rx, leak_stop));

        tracing::info!(qps, burst, "leaky bucket limiter initialized");
        Self {
            qps,
            burst,
            queue_tx,
            stop,
        }
    }

    pub fn qps(&self) -> u32 {
        self.qps
    }

    pub fn burst(&self) -> u32 {
        self.burst
    }

    /// Try to enqueue one admission without blocking.
    pub fn allow(&self) -> bool {
        self.queue_tx.try_send(()).is_ok()
    }

    pub fn admit(&self) -> Admission {
        if self.allow() {
            Admission::Allowed
        } else {
            Admission::Throttled { wait_ms: 0 }
        }
    }

    /// Stop the leak task. Idempotent; used at shutdown and on reload.
    pub fn shutdown(&self) {
        self.stop.cancel();
    }
}

impl Drop for LeakyBucket {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

async fn leak_loop(qps: u32, mut queue_rx: mpsc::Receiver<()>, stop: CancellationToken) {
    let period = Duration::from_secs(1) / qps;
    // First leak happens one full period after startup, not immediately.
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = stop.cancelled() => {
                tracing::info!("leaky bucket leak task stopped");
                return;
            }
            _ = ticker.tick() => {
                let _ = queue_rx.try_recv();
            }
        }
    }
}
