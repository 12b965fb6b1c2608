//! Storage ports.
//!
//! The item store is the single source of truth for lock state. Every
//! mutating method is a single conditional update; callers learn whether it
//! applied from the returned `bool` and never cache lock state between calls.

use std::time::{Duration as StdDuration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::assignment::{Assignment, AssignmentRole};
use crate::claim::claim_by_compare_and_set;
use crate::error::QueueError;
use crate::ids::{ItemId, ProjectId, QueueId, WorkerId};
use crate::item::{Item, ItemFilter, ItemStatus, NewItem};
use crate::queue::{NewQueue, Queue, QueueStatus};
use crate::stats::QueueStats;

/// Lock fields as last observed, used as the expected value of a compare-and-set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockSnapshot {
    pub locked_at: Option<DateTime<Utc>>,
    pub locked_by: Option<WorkerId>,
}

/// One claim attempt.
#[derive(Debug, Clone)]
pub struct ClaimRequest {
    pub queue_id: QueueId,
    pub worker: WorkerId,
    pub lease: Duration,
    pub excluded: Vec<ItemId>,
    pub now: DateTime<Utc>,
    /// The store must not commit a lock after this instant.
    pub deadline: Option<Instant>,
    /// Time budget the deadline was derived from.
    pub budget: StdDuration,
}

impl ClaimRequest {
    pub fn new(queue_id: QueueId, worker: WorkerId, lease: Duration, now: DateTime<Utc>) -> Self {
        Self {
            queue_id,
            worker,
            lease,
            excluded: Vec::new(),
            now,
            deadline: None,
            budget: StdDuration::ZERO,
        }
    }

    /// Skip these items even if eligible.
    pub fn with_excluded(mut self, excluded: Vec<ItemId>) -> Self {
        self.excluded = excluded;
        self
    }

    /// Refuse to commit once `budget` has elapsed from now.
    pub fn with_budget(mut self, budget: StdDuration) -> Self {
        self.deadline = Some(Instant::now() + budget);
        self.budget = budget;
        self
    }

    pub fn is_excluded(&self, id: &ItemId) -> bool {
        self.excluded.contains(id)
    }

    /// Full eligibility check for one item.
    pub fn admits(&self, item: &Item) -> bool {
        item.queue_id == self.queue_id
            && !self.is_excluded(&item.id)
            && item.is_claimable_by(&self.worker, self.now, self.lease)
    }

    /// Fail with `Timeout` once the deadline has passed.
    pub fn check_deadline(&self) -> Result<(), QueueError> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(QueueError::Timeout {
                operation: "claim",
                after: self.budget,
            }),
            _ => Ok(()),
        }
    }

    /// Lock timestamps at or before this instant are expired.
    pub fn expiry_cutoff(&self) -> DateTime<Utc> {
        crate::item::expiry_cutoff(self.now, self.lease)
    }
}

/// A terminal transition (complete or skip).
#[derive(Debug, Clone)]
pub struct TransitionRequest {
    pub item_id: ItemId,
    pub status: ItemStatus,
    /// Recorded as the annotator; also the only worker allowed past a live lease.
    pub worker: WorkerId,
    pub now: DateTime<Utc>,
    pub lease: Duration,
}

impl TransitionRequest {
    /// Whether `item` may take this transition right now.
    pub fn admits(&self, item: &Item) -> bool {
        item.status == ItemStatus::Pending && !item.is_locked_by_other(&self.worker, self.now, self.lease)
    }
}

/// Durable table of work items.
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Insert items, skipping any whose (object id, object type) already
    /// exists in the queue. Returns the number actually inserted.
    async fn insert_items(
        &self,
        queue_id: QueueId,
        items: Vec<NewItem>,
        now: DateTime<Utc>,
    ) -> Result<usize, QueueError>;

    /// Load one item.
    async fn get_item(&self, id: ItemId) -> Result<Option<Item>, QueueError>;

    /// List a queue's items in claim order.
    async fn list_items(&self, queue_id: QueueId, filter: &ItemFilter) -> Result<Vec<Item>, QueueError>;

    /// Select and lease one eligible item as a single isolated unit.
    ///
    /// The default builds this from `claim_candidates` and `set_lock`
    /// (compare-and-set with a bounded retry). Stores with a native
    /// select-and-lock should override it.
    async fn find_claimable(&self, request: &ClaimRequest) -> Result<Option<Item>, QueueError> {
        claim_by_compare_and_set(self, request).await
    }

    /// Up to `limit` eligible items in claim order, without locking.
    async fn claim_candidates(&self, request: &ClaimRequest, limit: usize) -> Result<Vec<Item>, QueueError>;

    /// Lock `item_id` for `worker` only if its lock fields still equal `expected`
    /// and it is still pending.
    async fn set_lock(
        &self,
        item_id: ItemId,
        expected: &LockSnapshot,
        worker: &WorkerId,
        now: DateTime<Utc>,
    ) -> Result<bool, QueueError>;

    /// Clear the lock only if `holder` holds a live lease on a pending item.
    async fn clear_lock(
        &self,
        item_id: ItemId,
        holder: &WorkerId,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<bool, QueueError>;

    /// Apply a terminal transition if the item is pending and not leased by
    /// another worker. Lock fields are cleared in the same update.
    async fn transition(&self, request: &TransitionRequest) -> Result<bool, QueueError>;

    /// Remove an item. Returns whether it existed.
    async fn delete_item(&self, id: ItemId) -> Result<bool, QueueError>;

    /// Clear the lock on every pending item in the queue whose lease has
    /// expired at `now`. Set-based; returns the number of items released.
    async fn bulk_clear_expired_locks(
        &self,
        queue_id: QueueId,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<u64, QueueError>;

    /// Aggregate counts with `in_progress` derived at `now`.
    async fn stats(&self, queue_id: QueueId, lease: Duration, now: DateTime<Utc>) -> Result<QueueStats, QueueError>;
}

/// Queue configuration collaborator.
#[async_trait]
pub trait QueueDirectory: Send + Sync {
    /// Create a queue. Names are unique per project.
    async fn create_queue(&self, new_queue: NewQueue, now: DateTime<Utc>) -> Result<Queue, QueueError>;

    /// Look up a queue within a project.
    ///
    /// Fails with `QueueNotFound` when absent and `ProjectMismatch` when it
    /// belongs to another project.
    async fn get_queue(&self, queue_id: QueueId, project_id: ProjectId) -> Result<Queue, QueueError>;

    /// Queues of one project, by name.
    async fn list_queues(&self, project_id: ProjectId) -> Result<Vec<Queue>, QueueError>;

    /// Change status (pause, archive, reactivate).
    async fn set_queue_status(
        &self,
        queue_id: QueueId,
        project_id: ProjectId,
        status: QueueStatus,
        now: DateTime<Utc>,
    ) -> Result<Queue, QueueError>;

    /// Change the lease duration.
    async fn set_lease_duration(
        &self,
        queue_id: QueueId,
        project_id: ProjectId,
        lease_secs: i64,
        now: DateTime<Utc>,
    ) -> Result<Queue, QueueError>;

    /// Delete a queue together with its items and assignments.
    async fn delete_queue(&self, queue_id: QueueId, project_id: ProjectId) -> Result<(), QueueError>;

    /// Every active queue in every project.
    ///
    /// Administrative, cross-tenant listing. Only the lease sweeper uses it.
    async fn list_active_queues_all_projects(&self) -> Result<Vec<Queue>, QueueError>;
}

/// Authorization gate consulted by the transport layer before claim,
/// complete and skip.
#[async_trait]
pub trait AccessGate: Send + Sync {
    /// Grant (or change) a worker's role on a queue.
    async fn assign(
        &self,
        queue_id: QueueId,
        worker: &WorkerId,
        role: AssignmentRole,
        now: DateTime<Utc>,
    ) -> Result<Assignment, QueueError>;

    /// Revoke an assignment. Returns whether one existed.
    async fn unassign(&self, queue_id: QueueId, worker: &WorkerId) -> Result<bool, QueueError>;

    /// Assignments of a queue.
    async fn list_assignments(&self, queue_id: QueueId) -> Result<Vec<Assignment>, QueueError>;

    /// Whether `worker` holds at least `minimum` on the queue.
    async fn check_access(
        &self,
        queue_id: QueueId,
        worker: &WorkerId,
        minimum: AssignmentRole,
    ) -> Result<bool, QueueError>;
}
