//! Store wrappers for exercising failure and race paths in unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::claim::claim_by_compare_and_set;
use crate::error::QueueError;
use crate::ids::{ItemId, QueueId, WorkerId};
use crate::item::{Item, ItemFilter, NewItem};
use crate::memory_store::MemoryStore;
use crate::score::{ScoreRecord, ScoreSink};
use crate::stats::QueueStats;
use crate::store::{ClaimRequest, ItemStore, LockSnapshot, TransitionRequest};

/// Delegates to a `MemoryStore`, with switchable misbehaviour.
pub(crate) struct ScriptedItems {
    pub inner: Arc<MemoryStore>,
    /// Claim through compare-and-set instead of the native claim.
    pub compare_and_set: bool,
    /// Fail this many claims with `Busy` before delegating.
    pub busy_claims: AtomicUsize,
    /// Fail sweeps of this queue.
    pub fail_sweep_for: Option<QueueId>,
    /// Sleep this long inside each sweep.
    pub sweep_delay: Option<StdDuration>,
    pub sweep_started: AtomicBool,
    pub sweep_finished: AtomicBool,
    /// Report every transition as not applied.
    pub reject_transitions: bool,
}

impl ScriptedItems {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            compare_and_set: false,
            busy_claims: AtomicUsize::new(0),
            fail_sweep_for: None,
            sweep_delay: None,
            sweep_started: AtomicBool::new(false),
            sweep_finished: AtomicBool::new(false),
            reject_transitions: false,
        }
    }
}

#[async_trait]
impl ItemStore for ScriptedItems {
    async fn insert_items(
        &self,
        queue_id: QueueId,
        items: Vec<NewItem>,
        now: DateTime<Utc>,
    ) -> Result<usize, QueueError> {
        self.inner.insert_items(queue_id, items, now).await
    }

    async fn get_item(&self, id: ItemId) -> Result<Option<Item>, QueueError> {
        self.inner.get_item(id).await
    }

    async fn list_items(&self, queue_id: QueueId, filter: &ItemFilter) -> Result<Vec<Item>, QueueError> {
        self.inner.list_items(queue_id, filter).await
    }

    async fn find_claimable(&self, request: &ClaimRequest) -> Result<Option<Item>, QueueError> {
        let busy = self
            .busy_claims
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if busy {
            return Err(QueueError::Busy("database is locked".to_string()));
        }
        if self.compare_and_set {
            claim_by_compare_and_set(self, request).await
        } else {
            self.inner.find_claimable(request).await
        }
    }

    async fn claim_candidates(&self, request: &ClaimRequest, limit: usize) -> Result<Vec<Item>, QueueError> {
        self.inner.claim_candidates(request, limit).await
    }

    async fn set_lock(
        &self,
        item_id: ItemId,
        expected: &LockSnapshot,
        worker: &WorkerId,
        now: DateTime<Utc>,
    ) -> Result<bool, QueueError> {
        self.inner.set_lock(item_id, expected, worker, now).await
    }

    async fn clear_lock(
        &self,
        item_id: ItemId,
        holder: &WorkerId,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<bool, QueueError> {
        self.inner.clear_lock(item_id, holder, now, lease).await
    }

    async fn transition(&self, request: &TransitionRequest) -> Result<bool, QueueError> {
        if self.reject_transitions {
            return Ok(false);
        }
        self.inner.transition(request).await
    }

    async fn delete_item(&self, id: ItemId) -> Result<bool, QueueError> {
        self.inner.delete_item(id).await
    }

    async fn bulk_clear_expired_locks(
        &self,
        queue_id: QueueId,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<u64, QueueError> {
        self.sweep_started.store(true, Ordering::SeqCst);
        if let Some(delay) = self.sweep_delay {
            tokio::time::sleep(delay).await;
        }
        let result = if self.fail_sweep_for == Some(queue_id) {
            Err(QueueError::Database("disk I/O error".to_string()))
        } else {
            self.inner.bulk_clear_expired_locks(queue_id, lease, now).await
        };
        self.sweep_finished.store(true, Ordering::SeqCst);
        result
    }

    async fn stats(&self, queue_id: QueueId, lease: Duration, now: DateTime<Utc>) -> Result<QueueStats, QueueError> {
        self.inner.stats(queue_id, lease, now).await
    }
}

/// Score sink that always fails.
pub(crate) struct FailingScoreSink;

#[async_trait]
impl ScoreSink for FailingScoreSink {
    async fn submit(&self, _records: Vec<ScoreRecord>) -> Result<(), QueueError> {
        Err(QueueError::ScoreSink("scoring service unavailable".to_string()))
    }
}

/// Score sink that remembers what it received.
#[derive(Default)]
pub(crate) struct RecordingScoreSink {
    pub records: parking_lot::Mutex<Vec<ScoreRecord>>,
}

#[async_trait]
impl ScoreSink for RecordingScoreSink {
    async fn submit(&self, records: Vec<ScoreRecord>) -> Result<(), QueueError> {
        self.records.lock().extend(records);
        Ok(())
    }
}
