//! Work item definition, status and lease derivation.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::QueueError;
use crate::ids::{ItemId, QueueId, WorkerId};
use crate::store::LockSnapshot;

/// Kind of external object an item points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    Trace,
    Span,
}

impl ObjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Trace => "trace",
            ObjectType::Span => "span",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectType {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trace" => Ok(ObjectType::Trace),
            "span" => Ok(ObjectType::Span),
            other => Err(QueueError::InvalidInput(format!("unknown object type '{other}'"))),
        }
    }
}

/// Item status.
///
/// There is no "in progress" status: a pending item with a live lease is
/// in progress, and that is always derived from the lock timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    /// Waiting for (or under) annotation.
    Pending,
    /// Annotated. Terminal.
    Completed,
    /// Passed over by an annotator. Terminal.
    Skipped,
}

impl Default for ItemStatus {
    fn default() -> Self {
        ItemStatus::Pending
    }
}

impl ItemStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemStatus::Completed | ItemStatus::Skipped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Completed => "completed",
            ItemStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemStatus {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ItemStatus::Pending),
            "completed" => Ok(ItemStatus::Completed),
            "skipped" => Ok(ItemStatus::Skipped),
            other => Err(QueueError::InvalidInput(format!("unknown item status '{other}'"))),
        }
    }
}

/// True once `lease` has fully elapsed since `locked_at`.
///
/// Exactly `lease` after the lock counts as expired.
pub fn lease_expired(locked_at: DateTime<Utc>, now: DateTime<Utc>, lease: Duration) -> bool {
    now.signed_duration_since(locked_at) >= lease
}

/// Lock timestamps at or before the returned instant are expired at `now`.
///
/// Saturates at the earliest representable time instead of overflowing.
pub fn expiry_cutoff(now: DateTime<Utc>, lease: Duration) -> DateTime<Utc> {
    now.checked_sub_signed(lease).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// One unit of annotation work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub queue_id: QueueId,
    /// Opaque id of the trace or span under review.
    pub object_id: String,
    pub object_type: ObjectType,
    pub status: ItemStatus,
    /// Higher is more urgent.
    pub priority: i32,
    pub locked_at: Option<DateTime<Utc>>,
    pub locked_by: Option<WorkerId>,
    /// Set when the item is completed or skipped.
    pub annotator: Option<WorkerId>,
    pub completed_at: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Item {
    /// Whether a lease is live at `now`.
    pub fn is_locked(&self, now: DateTime<Utc>, lease: Duration) -> bool {
        match self.locked_at {
            Some(locked_at) => !lease_expired(locked_at, now, lease),
            None => false,
        }
    }

    /// Holder of the live lease, if any.
    pub fn live_holder(&self, now: DateTime<Utc>, lease: Duration) -> Option<&WorkerId> {
        if self.is_locked(now, lease) {
            self.locked_by.as_ref()
        } else {
            None
        }
    }

    /// Whether a live lease is held by someone other than `worker`.
    pub fn is_locked_by_other(&self, worker: &WorkerId, now: DateTime<Utc>, lease: Duration) -> bool {
        self.is_locked(now, lease) && self.locked_by.as_ref() != Some(worker)
    }

    /// Eligibility predicate for claiming.
    pub fn is_claimable_by(&self, worker: &WorkerId, now: DateTime<Utc>, lease: Duration) -> bool {
        if self.status != ItemStatus::Pending {
            return false;
        }
        match self.locked_at {
            None => true,
            Some(locked_at) => {
                lease_expired(locked_at, now, lease) || self.locked_by.as_ref() == Some(worker)
            }
        }
    }

    /// Claim order: priority descending, then creation time ascending.
    ///
    /// Stores break remaining ties by insertion order.
    pub fn claim_order(&self, other: &Item) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| self.created_at.cmp(&other.created_at))
    }

    /// Current lock fields, for compare-and-set.
    pub fn lock_snapshot(&self) -> LockSnapshot {
        LockSnapshot {
            locked_at: self.locked_at,
            locked_by: self.locked_by.clone(),
        }
    }

    pub(crate) fn apply_lock(&mut self, worker: &WorkerId, now: DateTime<Utc>) {
        self.locked_at = Some(now);
        self.locked_by = Some(worker.clone());
        self.updated_at = now;
    }

    pub(crate) fn apply_unlock(&mut self, now: DateTime<Utc>) {
        self.locked_at = None;
        self.locked_by = None;
        self.updated_at = now;
    }

    /// Move to a terminal status. Lock fields are cleared in the same step.
    pub(crate) fn apply_terminal(&mut self, status: ItemStatus, annotator: &WorkerId, now: DateTime<Utc>) {
        self.status = status;
        self.annotator = Some(annotator.clone());
        self.completed_at = Some(now);
        self.apply_unlock(now);
    }
}

/// Parameters for adding an item to a queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewItem {
    pub object_id: String,
    pub object_type: ObjectType,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl NewItem {
    /// Create item parameters with priority 0.
    pub fn new(object_id: impl Into<String>, object_type: ObjectType) -> Self {
        Self {
            object_id: object_id.into(),
            object_type,
            priority: 0,
            metadata: serde_json::Value::Null,
        }
    }

    /// Set priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set metadata.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Key enforcing one item per object per queue.
    pub fn dedup_key(&self) -> (&str, ObjectType) {
        (self.object_id.as_str(), self.object_type)
    }

    pub(crate) fn validate(&self) -> Result<(), QueueError> {
        if self.object_id.trim().is_empty() {
            return Err(QueueError::InvalidInput("object_id cannot be empty".to_string()));
        }
        Ok(())
    }

    /// Build the stored item.
    pub fn into_item(self, queue_id: QueueId, now: DateTime<Utc>) -> Item {
        Item {
            id: ItemId::new(),
            queue_id,
            object_id: self.object_id,
            object_type: self.object_type,
            status: ItemStatus::Pending,
            priority: self.priority,
            locked_at: None,
            locked_by: None,
            annotator: None,
            completed_at: None,
            metadata: self.metadata,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Listing filter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemFilter {
    pub status: Option<ItemStatus>,
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
}

impl ItemFilter {
    pub fn with_status(status: ItemStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn matches(&self, item: &Item) -> bool {
        self.status.is_none_or(|status| item.status == status)
    }
}

#[cfg(test)]
#[path = "item_tests.rs"]
mod tests;
