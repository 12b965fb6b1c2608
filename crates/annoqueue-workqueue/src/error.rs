//! Queue errors.

use std::time::Duration;

use thiserror::Error;

use crate::ids::{ItemId, ProjectId, QueueId, WorkerId};
use crate::item::ItemStatus;
use crate::queue::QueueStatus;

/// Queue error types.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Queue does not exist.
    #[error("Queue not found: {0}")]
    QueueNotFound(QueueId),

    /// Queue exists but belongs to another project.
    #[error("Queue {queue} does not belong to project {project}")]
    ProjectMismatch { queue: QueueId, project: ProjectId },

    /// Item does not exist in the addressed queue.
    #[error("Item not found: {0}")]
    ItemNotFound(ItemId),

    /// Claims are only served from active queues.
    #[error("Queue {queue} is not active (status: {status})")]
    QueueNotActive { queue: QueueId, status: QueueStatus },

    /// No eligible item right now. A normal outcome, not a failure.
    #[error("No items available")]
    NoItemsAvailable,

    /// Item was already completed or skipped.
    #[error("Item {item} is already {status}")]
    AlreadyTerminal { item: ItemId, status: ItemStatus },

    /// Another worker holds a live lease on the item.
    #[error("Item {item} is locked by another user ({holder})")]
    LockedByOther { item: ItemId, holder: WorkerId },

    /// Release requested on an item without a live lease.
    #[error("Item {0} is not locked")]
    NotLocked(ItemId),

    /// Conditional update lost a race and the re-read shows no specific cause.
    #[error("Item {0} was modified concurrently")]
    ConcurrentModification(ItemId),

    /// Queue name already used in the project.
    #[error("Queue name '{name}' already exists in project {project}")]
    DuplicateQueueName { project: ProjectId, name: String },

    /// Rejected input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Store call did not finish before its deadline.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// Store is contended; the claim step may retry.
    #[error("Database busy: {0}")]
    Busy(String),

    /// Database error.
    #[error("Database error: {0}")]
    Database(String),

    /// Score submission failed.
    #[error("Score sink error: {0}")]
    ScoreSink(String),
}

impl QueueError {
    /// Queue or item absent, or out of project scope.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            QueueError::QueueNotFound(_)
                | QueueError::ProjectMismatch { .. }
                | QueueError::ItemNotFound(_)
        )
    }

    /// Precondition failures a caller can act on (re-poll, abort).
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            QueueError::AlreadyTerminal { .. }
                | QueueError::LockedByOther { .. }
                | QueueError::NotLocked(_)
                | QueueError::ConcurrentModification(_)
                | QueueError::QueueNotActive { .. }
        )
    }

    /// The empty claim outcome.
    pub fn is_empty_result(&self) -> bool {
        matches!(self, QueueError::NoItemsAvailable)
    }

    /// Failures worth another claim attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, QueueError::Busy(_))
    }
}

impl From<rusqlite::Error> for QueueError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked) => {
                QueueError::Busy(err.to_string())
            }
            _ => QueueError::Database(err.to_string()),
        }
    }
}

impl From<tokio_rusqlite::Error> for QueueError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        match err {
            tokio_rusqlite::Error::Rusqlite(e) => e.into(),
            tokio_rusqlite::Error::Other(boxed) => match boxed.downcast::<QueueError>() {
                Ok(queue_err) => *queue_err,
                Err(other) => QueueError::Database(other.to_string()),
            },
            other => QueueError::Database(other.to_string()),
        }
    }
}

impl From<QueueError> for tokio_rusqlite::Error {
    fn from(err: QueueError) -> Self {
        tokio_rusqlite::Error::Other(Box::new(err))
    }
}
