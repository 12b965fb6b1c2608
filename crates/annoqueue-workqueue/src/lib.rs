//! # annoqueue Workqueue
//!
//! Work-claiming and lease-expiry engine for shared annotation queues.
//!
//! ## Features
//!
//! - Atomic claim-next with priority/FIFO ordering
//! - Time-derived leases (no stored "in progress" flag)
//! - Complete / skip / release with lock-ownership checks
//! - Background lease expiry sweeper with graceful shutdown
//! - In-memory and SQLite stores

pub mod assignment;
pub mod claim;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod ids;
pub mod item;
pub mod lifecycle;
pub mod memory_store;
pub mod queue;
pub mod score;
pub mod sqlite_store;
pub mod stats;
pub mod store;
pub mod sweeper;

mod sqlite_schema;

#[cfg(test)]
mod test_support;

pub use assignment::{Assignment, AssignmentRole};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EngineConfig, SweeperConfig};
pub use engine::{AnnotationQueueEngine, QueueScope};
pub use error::QueueError;
pub use ids::{ItemId, ProjectId, QueueId, WorkerId};
pub use item::{Item, ItemFilter, ItemStatus, NewItem, ObjectType};
pub use memory_store::MemoryStore;
pub use queue::{NewQueue, Queue, QueueStatus};
pub use score::{LogScoreSink, NoopScoreSink, ScoreInput, ScoreRecord, ScoreSink};
pub use sqlite_store::SqliteStore;
pub use stats::QueueStats;
pub use store::{AccessGate, ClaimRequest, ItemStore, LockSnapshot, QueueDirectory, TransitionRequest};
pub use sweeper::{LeaseSweeper, SweepReport, SweeperHandle};
