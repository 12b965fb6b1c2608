//! In-memory store.
//!
//! Holds queues, items and assignments behind one `tokio::sync::RwLock`.
//! Every mutating call runs under the write guard, so the claim
//! select-and-lock is a single indivisible step for all callers sharing the
//! store. State is lost on drop; use `SqliteStore` for durability.

use std::cmp::Ordering;
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use crate::assignment::{Assignment, AssignmentRole};
use crate::error::QueueError;
use crate::ids::{ItemId, ProjectId, QueueId, WorkerId};
use crate::item::{Item, ItemFilter, NewItem};
use crate::queue::{NewQueue, Queue, QueueStatus, validate_lease_secs};
use crate::stats::QueueStats;
use crate::store::{AccessGate, ClaimRequest, ItemStore, LockSnapshot, QueueDirectory, TransitionRequest};

struct StoredItem {
    /// Insertion sequence, the final claim-order tie-break.
    seq: u64,
    item: Item,
}

impl StoredItem {
    fn claim_order(&self, other: &StoredItem) -> Ordering {
        self.item
            .claim_order(&other.item)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

#[derive(Default)]
struct MemoryState {
    queues: HashMap<QueueId, Queue>,
    items: HashMap<ItemId, StoredItem>,
    assignments: HashMap<(QueueId, WorkerId), Assignment>,
    next_seq: u64,
}

impl MemoryState {
    fn queue_in_project(&self, queue_id: QueueId, project_id: ProjectId) -> Result<&Queue, QueueError> {
        let queue = self
            .queues
            .get(&queue_id)
            .ok_or(QueueError::QueueNotFound(queue_id))?;
        if queue.project_id != project_id {
            return Err(QueueError::ProjectMismatch {
                queue: queue_id,
                project: project_id,
            });
        }
        Ok(queue)
    }

    fn queue_in_project_mut(
        &mut self,
        queue_id: QueueId,
        project_id: ProjectId,
    ) -> Result<&mut Queue, QueueError> {
        self.queue_in_project(queue_id, project_id)?;
        self.queues
            .get_mut(&queue_id)
            .ok_or(QueueError::QueueNotFound(queue_id))
    }

    /// A queue's items in claim order.
    fn sorted_items(&self, queue_id: QueueId) -> Vec<&StoredItem> {
        let mut items: Vec<&StoredItem> = self
            .items
            .values()
            .filter(|stored| stored.item.queue_id == queue_id)
            .collect();
        items.sort_by(|a, b| a.claim_order(b));
        items
    }

    fn eligible(&self, request: &ClaimRequest) -> Vec<&StoredItem> {
        self.sorted_items(request.queue_id)
            .into_iter()
            .filter(|stored| request.admits(&stored.item))
            .collect()
    }
}

/// Store that keeps everything in process memory.
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ItemStore for MemoryStore {
    async fn insert_items(
        &self,
        queue_id: QueueId,
        items: Vec<NewItem>,
        now: DateTime<Utc>,
    ) -> Result<usize, QueueError> {
        let mut state = self.state.write().await;
        if !state.queues.contains_key(&queue_id) {
            return Err(QueueError::QueueNotFound(queue_id));
        }

        let mut inserted = 0;
        for new_item in items {
            let duplicate = state.items.values().any(|stored| {
                stored.item.queue_id == queue_id
                    && stored.item.object_id == new_item.object_id
                    && stored.item.object_type == new_item.object_type
            });
            if duplicate {
                continue;
            }
            let seq = state.next_seq;
            state.next_seq += 1;
            let item = new_item.into_item(queue_id, now);
            state.items.insert(item.id, StoredItem { seq, item });
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn get_item(&self, id: ItemId) -> Result<Option<Item>, QueueError> {
        let state = self.state.read().await;
        Ok(state.items.get(&id).map(|stored| stored.item.clone()))
    }

    async fn list_items(&self, queue_id: QueueId, filter: &ItemFilter) -> Result<Vec<Item>, QueueError> {
        let state = self.state.read().await;
        let items = state
            .sorted_items(queue_id)
            .into_iter()
            .map(|stored| &stored.item)
            .filter(|item| filter.matches(item))
            .skip(filter.offset)
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok(items)
    }

    async fn find_claimable(&self, request: &ClaimRequest) -> Result<Option<Item>, QueueError> {
        let mut state = self.state.write().await;
        request.check_deadline()?;

        let Some(id) = state.eligible(request).first().map(|stored| stored.item.id) else {
            return Ok(None);
        };
        let Some(stored) = state.items.get_mut(&id) else {
            return Ok(None);
        };
        stored.item.apply_lock(&request.worker, request.now);
        Ok(Some(stored.item.clone()))
    }

    async fn claim_candidates(&self, request: &ClaimRequest, limit: usize) -> Result<Vec<Item>, QueueError> {
        let state = self.state.read().await;
        Ok(state
            .eligible(request)
            .into_iter()
            .take(limit)
            .map(|stored| stored.item.clone())
            .collect())
    }

    async fn set_lock(
        &self,
        item_id: ItemId,
        expected: &LockSnapshot,
        worker: &WorkerId,
        now: DateTime<Utc>,
    ) -> Result<bool, QueueError> {
        let mut state = self.state.write().await;
        match state.items.get_mut(&item_id) {
            Some(stored)
                if !stored.item.status.is_terminal() && stored.item.lock_snapshot() == *expected =>
            {
                stored.item.apply_lock(worker, now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn clear_lock(
        &self,
        item_id: ItemId,
        holder: &WorkerId,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<bool, QueueError> {
        let mut state = self.state.write().await;
        match state.items.get_mut(&item_id) {
            Some(stored)
                if !stored.item.status.is_terminal()
                    && stored.item.live_holder(now, lease) == Some(holder) =>
            {
                stored.item.apply_unlock(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn transition(&self, request: &TransitionRequest) -> Result<bool, QueueError> {
        let mut state = self.state.write().await;
        match state.items.get_mut(&request.item_id) {
            Some(stored) if request.admits(&stored.item) => {
                stored
                    .item
                    .apply_terminal(request.status, &request.worker, request.now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_item(&self, id: ItemId) -> Result<bool, QueueError> {
        let mut state = self.state.write().await;
        Ok(state.items.remove(&id).is_some())
    }

    async fn bulk_clear_expired_locks(
        &self,
        queue_id: QueueId,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<u64, QueueError> {
        let mut state = self.state.write().await;
        let mut released = 0;
        for stored in state.items.values_mut() {
            let item = &mut stored.item;
            if item.queue_id == queue_id
                && !item.status.is_terminal()
                && item.locked_at.is_some()
                && !item.is_locked(now, lease)
            {
                item.apply_unlock(now);
                released += 1;
            }
        }
        Ok(released)
    }

    async fn stats(&self, queue_id: QueueId, lease: Duration, now: DateTime<Utc>) -> Result<QueueStats, QueueError> {
        let state = self.state.read().await;
        let items = state
            .items
            .values()
            .map(|stored| &stored.item)
            .filter(|item| item.queue_id == queue_id);
        Ok(QueueStats::from_items(items, now, lease))
    }
}

#[async_trait]
impl QueueDirectory for MemoryStore {
    async fn create_queue(&self, new_queue: NewQueue, now: DateTime<Utc>) -> Result<Queue, QueueError> {
        new_queue.validate()?;
        let mut state = self.state.write().await;
        let taken = state
            .queues
            .values()
            .any(|q| q.project_id == new_queue.project_id && q.name == new_queue.name);
        if taken {
            return Err(QueueError::DuplicateQueueName {
                project: new_queue.project_id,
                name: new_queue.name,
            });
        }
        let queue = new_queue.into_queue(now);
        state.queues.insert(queue.id, queue.clone());
        Ok(queue)
    }

    async fn get_queue(&self, queue_id: QueueId, project_id: ProjectId) -> Result<Queue, QueueError> {
        let state = self.state.read().await;
        state.queue_in_project(queue_id, project_id).cloned()
    }

    async fn list_queues(&self, project_id: ProjectId) -> Result<Vec<Queue>, QueueError> {
        let state = self.state.read().await;
        let mut queues: Vec<Queue> = state
            .queues
            .values()
            .filter(|q| q.project_id == project_id)
            .cloned()
            .collect();
        queues.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(queues)
    }

    async fn set_queue_status(
        &self,
        queue_id: QueueId,
        project_id: ProjectId,
        status: QueueStatus,
        now: DateTime<Utc>,
    ) -> Result<Queue, QueueError> {
        let mut state = self.state.write().await;
        let queue = state.queue_in_project_mut(queue_id, project_id)?;
        queue.status = status;
        queue.updated_at = now;
        Ok(queue.clone())
    }

    async fn set_lease_duration(
        &self,
        queue_id: QueueId,
        project_id: ProjectId,
        lease_secs: i64,
        now: DateTime<Utc>,
    ) -> Result<Queue, QueueError> {
        validate_lease_secs(lease_secs)?;
        let mut state = self.state.write().await;
        let queue = state.queue_in_project_mut(queue_id, project_id)?;
        queue.lease_duration_secs = lease_secs;
        queue.updated_at = now;
        Ok(queue.clone())
    }

    async fn delete_queue(&self, queue_id: QueueId, project_id: ProjectId) -> Result<(), QueueError> {
        let mut state = self.state.write().await;
        state.queue_in_project(queue_id, project_id)?;
        state.queues.remove(&queue_id);
        state.items.retain(|_, stored| stored.item.queue_id != queue_id);
        state.assignments.retain(|(queue, _), _| *queue != queue_id);
        Ok(())
    }

    async fn list_active_queues_all_projects(&self) -> Result<Vec<Queue>, QueueError> {
        let state = self.state.read().await;
        Ok(state.queues.values().filter(|q| q.is_active()).cloned().collect())
    }
}

#[async_trait]
impl AccessGate for MemoryStore {
    async fn assign(
        &self,
        queue_id: QueueId,
        worker: &WorkerId,
        role: AssignmentRole,
        now: DateTime<Utc>,
    ) -> Result<Assignment, QueueError> {
        let mut state = self.state.write().await;
        if !state.queues.contains_key(&queue_id) {
            return Err(QueueError::QueueNotFound(queue_id));
        }
        let assignment = state
            .assignments
            .entry((queue_id, worker.clone()))
            .and_modify(|existing| existing.role = role)
            .or_insert_with(|| Assignment {
                queue_id,
                worker: worker.clone(),
                role,
                created_at: now,
            });
        Ok(assignment.clone())
    }

    async fn unassign(&self, queue_id: QueueId, worker: &WorkerId) -> Result<bool, QueueError> {
        let mut state = self.state.write().await;
        Ok(state.assignments.remove(&(queue_id, worker.clone())).is_some())
    }

    async fn list_assignments(&self, queue_id: QueueId) -> Result<Vec<Assignment>, QueueError> {
        let state = self.state.read().await;
        let mut assignments: Vec<Assignment> = state
            .assignments
            .values()
            .filter(|a| a.queue_id == queue_id)
            .cloned()
            .collect();
        assignments.sort_by(|a, b| a.worker.as_str().cmp(b.worker.as_str()));
        Ok(assignments)
    }

    async fn check_access(
        &self,
        queue_id: QueueId,
        worker: &WorkerId,
        minimum: AssignmentRole,
    ) -> Result<bool, QueueError> {
        let state = self.state.read().await;
        Ok(state
            .assignments
            .get(&(queue_id, worker.clone()))
            .is_some_and(|a| a.role.satisfies(minimum)))
    }
}

#[cfg(test)]
impl MemoryStore {
    /// Overwrite a queue's stored lease, bypassing validation.
    pub(crate) async fn force_lease_secs(&self, queue_id: QueueId, secs: i64) {
        if let Some(queue) = self.state.write().await.queues.get_mut(&queue_id) {
            queue.lease_duration_secs = secs;
        }
    }
}

#[cfg(test)]
#[path = "memory_store_tests.rs"]
mod tests;
