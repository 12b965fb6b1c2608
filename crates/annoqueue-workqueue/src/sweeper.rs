//! Lease expiry sweeper.
//!
//! Claims only notice an expired lease when someone claims from that queue.
//! The sweeper clears expired leases across every active queue on a fixed
//! interval so abandoned items stop counting as in progress.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::SweeperConfig;
use crate::error::QueueError;
use crate::ids::QueueId;
use crate::store::{ItemStore, QueueDirectory};

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub queues_scanned: usize,
    pub locks_released: u64,
    /// Queues whose sweep failed, with the error message.
    pub failures: Vec<(QueueId, String)>,
}

/// Periodically clears expired leases.
pub struct LeaseSweeper {
    items: Arc<dyn ItemStore>,
    queues: Arc<dyn QueueDirectory>,
    clock: Arc<dyn Clock>,
    config: SweeperConfig,
    tick_count: AtomicU64,
    released_total: AtomicU64,
}

impl LeaseSweeper {
    /// Create a sweeper using the system clock.
    pub fn new(items: Arc<dyn ItemStore>, queues: Arc<dyn QueueDirectory>, config: SweeperConfig) -> Self {
        Self {
            items,
            queues,
            clock: Arc::new(SystemClock),
            config,
            tick_count: AtomicU64::new(0),
            released_total: AtomicU64::new(0),
        }
    }

    /// Replace the clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Number of completed ticks.
    pub fn tick_count(&self) -> u64 {
        self.tick_count.load(Ordering::SeqCst)
    }

    /// Locks released since start.
    pub fn released_total(&self) -> u64 {
        self.released_total.load(Ordering::SeqCst)
    }

    /// Sweep every active queue once.
    ///
    /// A failure on one queue is recorded in the report and the remaining
    /// queues are still swept. Only a failure to list the queues fails the call.
    pub async fn run_once(&self) -> Result<SweepReport, QueueError> {
        let queues = self.queues.list_active_queues_all_projects().await?;
        let now = self.clock.now();
        let mut report = SweepReport {
            queues_scanned: queues.len(),
            ..Default::default()
        };

        for queue in &queues {
            let lease = queue.lease_duration(self.config.default_lease_secs);
            match self.items.bulk_clear_expired_locks(queue.id, lease, now).await {
                Ok(released) => {
                    if released > 0 {
                        debug!("Released {} expired leases in queue {}", released, queue.id);
                    }
                    report.locks_released += released;
                }
                Err(e) => {
                    warn!("Lease sweep failed for queue {}: {}", queue.id, e);
                    report.failures.push((queue.id, e.to_string()));
                }
            }
        }

        self.released_total
            .fetch_add(report.locks_released, Ordering::SeqCst);
        Ok(report)
    }

    /// One bounded tick. Returns `None` when the sweep failed or timed out.
    pub async fn run_tick(&self) -> Option<SweepReport> {
        let start = Instant::now();
        let timeout = self.config.tick_timeout();
        let outcome = tokio::time::timeout(timeout, self.run_once()).await;
        self.tick_count.fetch_add(1, Ordering::SeqCst);

        match outcome {
            Ok(Ok(report)) => {
                info!(
                    queues = report.queues_scanned,
                    released = report.locks_released,
                    failed = report.failures.len(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "lease sweep finished"
                );
                Some(report)
            }
            Ok(Err(e)) => {
                error!("Lease sweep could not list queues: {}", e);
                None
            }
            Err(_) => {
                error!("Lease sweep timed out after {:?}", timeout);
                None
            }
        }
    }

    /// Start the sweep loop. The first sweep runs immediately.
    pub fn spawn(self: Arc<Self>) -> SweeperHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.run_loop(shutdown_rx));
        SweeperHandle { shutdown_tx, task }
    }

    async fn run_loop(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        let period = self.config.interval();
        info!("Starting lease sweeper (interval: {:?})", period);

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            // Shutdown is only observed between ticks.
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown_rx.changed() => {
                    info!("Lease sweeper shutting down");
                    break;
                }
            }
            self.run_tick().await;
        }
    }
}

/// Running sweeper task.
pub struct SweeperHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signal shutdown and wait for the in-flight tick, if any, to finish.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            error!("Lease sweeper task failed: {}", e);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[cfg(test)]
#[path = "sweeper_tests.rs"]
mod tests;
