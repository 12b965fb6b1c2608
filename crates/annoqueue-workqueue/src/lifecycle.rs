//! Lifecycle operations: complete, skip, release and delete.
//!
//! Each transition reads the item, checks its preconditions against the
//! derived lock state, then issues one conditional update. When the update
//! does not apply the item is read again so the caller gets the specific
//! reason (terminal, locked by another) rather than a generic failure.
//! Lifecycle transitions are never retried.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::engine::{AnnotationQueueEngine, QueueScope};
use crate::error::QueueError;
use crate::ids::{ItemId, WorkerId};
use crate::item::{Item, ItemStatus};
use crate::queue::Queue;
use crate::score::{ScoreInput, ScoreRecord};
use crate::store::TransitionRequest;

/// Preconditions shared by complete and skip.
pub(crate) fn check_terminal_transition(
    item: &Item,
    worker: &WorkerId,
    now: DateTime<Utc>,
    lease: Duration,
) -> Result<(), QueueError> {
    if item.status.is_terminal() {
        return Err(QueueError::AlreadyTerminal {
            item: item.id,
            status: item.status,
        });
    }
    if let Some(holder) = item.live_holder(now, lease) {
        if holder != worker {
            return Err(QueueError::LockedByOther {
                item: item.id,
                holder: holder.clone(),
            });
        }
    }
    Ok(())
}

/// Preconditions for a self-release. Terminal items never hold a lock.
pub(crate) fn check_release(
    item: &Item,
    worker: &WorkerId,
    now: DateTime<Utc>,
    lease: Duration,
) -> Result<(), QueueError> {
    if item.status.is_terminal() {
        return Err(QueueError::NotLocked(item.id));
    }
    match item.live_holder(now, lease) {
        None => Err(QueueError::NotLocked(item.id)),
        Some(holder) if holder != worker => Err(QueueError::LockedByOther {
            item: item.id,
            holder: holder.clone(),
        }),
        Some(_) => Ok(()),
    }
}

type Precondition = fn(&Item, &WorkerId, DateTime<Utc>, Duration) -> Result<(), QueueError>;

impl AnnotationQueueEngine {
    /// Mark an item completed and hand its scores to the score sink.
    ///
    /// Score submission happens after the completion is stored; its failure
    /// is logged and does not fail the call.
    pub async fn complete(
        &self,
        scope: QueueScope,
        item_id: ItemId,
        worker: &WorkerId,
        scores: Vec<ScoreInput>,
    ) -> Result<Item, QueueError> {
        let item = self
            .finish(scope, item_id, worker, ItemStatus::Completed)
            .await?;
        info!("Item {} completed by {}", item.id, worker);

        if !scores.is_empty() {
            let records: Vec<ScoreRecord> = scores
                .into_iter()
                .map(|input| ScoreRecord::for_item(&item, worker, input))
                .collect();
            let count = records.len();
            if let Err(e) = self.bounded("submit_scores", self.scores.submit(records)).await {
                warn!(
                    item_id = %item.id,
                    scores = count,
                    error = %e,
                    "score submission failed; completion kept"
                );
            }
        }

        Ok(item)
    }

    /// Mark an item skipped. `reason` is only logged.
    pub async fn skip(
        &self,
        scope: QueueScope,
        item_id: ItemId,
        worker: &WorkerId,
        reason: Option<&str>,
    ) -> Result<Item, QueueError> {
        let item = self.finish(scope, item_id, worker, ItemStatus::Skipped).await?;
        info!(
            item_id = %item.id,
            annotator = %worker,
            reason = reason.unwrap_or(""),
            "item skipped"
        );
        Ok(item)
    }

    /// Give up a live lease held by `worker`. Status is unchanged.
    ///
    /// Fails with `NotLocked` when there is no live lease, which includes
    /// completed and skipped items.
    pub async fn release_lock(
        &self,
        scope: QueueScope,
        item_id: ItemId,
        worker: &WorkerId,
    ) -> Result<Item, QueueError> {
        let queue = self.resolve_queue(scope).await?;
        let lease = self.lease_for(&queue);
        let mut item = self.load_item(&queue, item_id).await?;
        let now = self.now();
        check_release(&item, worker, now, lease)?;

        let applied = self
            .bounded("clear_lock", self.items.clear_lock(item_id, worker, now, lease))
            .await?;
        if !applied {
            return Err(self.explain_lost_update(&queue, item_id, worker, lease, check_release).await);
        }

        item.apply_unlock(now);
        debug!("Worker {} released item {}", worker, item_id);
        Ok(item)
    }

    /// Remove an item regardless of its state.
    pub async fn delete_item(&self, scope: QueueScope, item_id: ItemId) -> Result<(), QueueError> {
        let queue = self.resolve_queue(scope).await?;
        self.load_item(&queue, item_id).await?;
        if !self.bounded("delete_item", self.items.delete_item(item_id)).await? {
            return Err(QueueError::ItemNotFound(item_id));
        }
        info!("Deleted item {} from queue {}", item_id, queue.id);
        Ok(())
    }

    async fn finish(
        &self,
        scope: QueueScope,
        item_id: ItemId,
        worker: &WorkerId,
        status: ItemStatus,
    ) -> Result<Item, QueueError> {
        let queue = self.resolve_queue(scope).await?;
        let lease = self.lease_for(&queue);
        let mut item = self.load_item(&queue, item_id).await?;
        let now = self.now();
        check_terminal_transition(&item, worker, now, lease)?;

        let request = TransitionRequest {
            item_id,
            status,
            worker: worker.clone(),
            now,
            lease,
        };
        let applied = self
            .bounded("transition", self.items.transition(&request))
            .await?;
        if !applied {
            return Err(self
                .explain_lost_update(&queue, item_id, worker, lease, check_terminal_transition)
                .await);
        }

        item.apply_terminal(status, worker, now);
        Ok(item)
    }

    /// A conditional update did not apply; work out why from a fresh read.
    async fn explain_lost_update(
        &self,
        queue: &Queue,
        item_id: ItemId,
        worker: &WorkerId,
        lease: Duration,
        precondition: Precondition,
    ) -> QueueError {
        let item = match self.load_item(queue, item_id).await {
            Ok(item) => item,
            Err(e) => return e,
        };
        match precondition(&item, worker, self.now(), lease) {
            Err(e) => e,
            Ok(()) => QueueError::ConcurrentModification(item_id),
        }
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
