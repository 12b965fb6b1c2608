//! Annotation queue engine.
//!
//! Owns the collaborators (item store, queue directory, score sink, clock)
//! and exposes every queue operation. Claim and lifecycle operations live in
//! `claim.rs` and `lifecycle.rs` as further `impl` blocks.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::error::QueueError;
use crate::ids::{ItemId, ProjectId, QueueId};
use crate::item::{Item, ItemFilter, NewItem};
use crate::queue::Queue;
use crate::score::{NoopScoreSink, ScoreSink};
use crate::stats::QueueStats;
use crate::store::{ItemStore, QueueDirectory};

/// The (project, queue) pair every operation is addressed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueScope {
    pub project_id: ProjectId,
    pub queue_id: QueueId,
}

impl QueueScope {
    pub fn new(project_id: ProjectId, queue_id: QueueId) -> Self {
        Self { project_id, queue_id }
    }
}

impl From<&Queue> for QueueScope {
    fn from(queue: &Queue) -> Self {
        Self::new(queue.project_id, queue.id)
    }
}

/// Work-claiming engine for annotation queues.
pub struct AnnotationQueueEngine {
    pub(crate) items: Arc<dyn ItemStore>,
    pub(crate) queues: Arc<dyn QueueDirectory>,
    pub(crate) scores: Arc<dyn ScoreSink>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) config: EngineConfig,
}

impl AnnotationQueueEngine {
    /// Create an engine with the system clock, default config and no score sink.
    pub fn new(items: Arc<dyn ItemStore>, queues: Arc<dyn QueueDirectory>) -> Self {
        Self {
            items,
            queues,
            scores: Arc::new(NoopScoreSink),
            clock: Arc::new(SystemClock),
            config: EngineConfig::default(),
        }
    }

    /// Replace the clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the score sink.
    pub fn with_score_sink(mut self, scores: Arc<dyn ScoreSink>) -> Self {
        self.scores = scores;
        self
    }

    /// Replace the config.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn queues(&self) -> &Arc<dyn QueueDirectory> {
        &self.queues
    }

    pub fn items(&self) -> &Arc<dyn ItemStore> {
        &self.items
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Run a store call under the configured store timeout.
    pub(crate) async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> Result<T, QueueError>
    where
        F: Future<Output = Result<T, QueueError>>,
    {
        self.bounded_for(operation, self.config.store_timeout(), fut).await
    }

    pub(crate) async fn bounded_for<T, F>(
        &self,
        operation: &'static str,
        after: StdDuration,
        fut: F,
    ) -> Result<T, QueueError>
    where
        F: Future<Output = Result<T, QueueError>>,
    {
        match tokio::time::timeout(after, fut).await {
            Ok(result) => result,
            Err(_) => Err(QueueError::Timeout { operation, after }),
        }
    }

    /// Load the queue, enforcing the project scope.
    pub(crate) async fn resolve_queue(&self, scope: QueueScope) -> Result<Queue, QueueError> {
        self.bounded("get_queue", self.queues.get_queue(scope.queue_id, scope.project_id))
            .await
    }

    /// Lease that applies to `queue`.
    pub(crate) fn lease_for(&self, queue: &Queue) -> Duration {
        queue.lease_duration(self.config.default_lease_secs)
    }

    /// Load an item that must belong to the scoped queue.
    pub(crate) async fn load_item(&self, queue: &Queue, item_id: ItemId) -> Result<Item, QueueError> {
        let item = self
            .bounded("get_item", self.items.get_item(item_id))
            .await?
            .ok_or(QueueError::ItemNotFound(item_id))?;
        if item.queue_id != queue.id {
            return Err(QueueError::ItemNotFound(item_id));
        }
        Ok(item)
    }

    /// Counts for the queue, with `in_progress` derived at the current time.
    pub async fn stats(&self, scope: QueueScope) -> Result<QueueStats, QueueError> {
        let queue = self.resolve_queue(scope).await?;
        let lease = self.lease_for(&queue);
        let now = self.now();
        self.bounded("stats", self.items.stats(queue.id, lease, now)).await
    }

    /// Add items to a queue. Objects already present are skipped.
    ///
    /// Returns how many items were inserted.
    pub async fn add_items(&self, scope: QueueScope, items: Vec<NewItem>) -> Result<usize, QueueError> {
        let queue = self.resolve_queue(scope).await?;
        for item in &items {
            item.validate()?;
        }
        let requested = items.len();
        let now = self.now();
        let inserted = self
            .bounded("insert_items", self.items.insert_items(queue.id, items, now))
            .await?;
        debug!(
            "Added {} of {} items to queue {} ({} duplicates)",
            inserted,
            requested,
            queue.id,
            requested - inserted
        );
        Ok(inserted)
    }

    /// Fetch one item of the queue.
    pub async fn get_item(&self, scope: QueueScope, item_id: ItemId) -> Result<Item, QueueError> {
        let queue = self.resolve_queue(scope).await?;
        self.load_item(&queue, item_id).await
    }

    /// List the queue's items in claim order.
    pub async fn list_items(&self, scope: QueueScope, filter: &ItemFilter) -> Result<Vec<Item>, QueueError> {
        let queue = self.resolve_queue(scope).await?;
        self.bounded("list_items", self.items.list_items(queue.id, filter)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::item::ObjectType;
    use crate::memory_store::MemoryStore;
    use crate::queue::NewQueue;

    async fn setup() -> (AnnotationQueueEngine, QueueScope) {
        let store = Arc::new(MemoryStore::new());
        let queue = store
            .create_queue(NewQueue::new(ProjectId::new(), "review"), Utc::now())
            .await
            .unwrap();
        let engine = AnnotationQueueEngine::new(store.clone(), store)
            .with_clock(Arc::new(ManualClock::new(Utc::now())));
        (engine, QueueScope::from(&queue))
    }

    #[tokio::test]
    async fn test_add_items_skips_duplicates() {
        let (engine, scope) = setup().await;
        let first = engine
            .add_items(scope, vec![NewItem::new("t1", ObjectType::Trace)])
            .await
            .unwrap();
        assert_eq!(first, 1);

        let second = engine
            .add_items(
                scope,
                vec![
                    NewItem::new("t1", ObjectType::Trace),
                    NewItem::new("t1", ObjectType::Span),
                ],
            )
            .await
            .unwrap();
        assert_eq!(second, 1);
        assert_eq!(engine.stats(scope).await.unwrap().total, 2);
    }

    #[tokio::test]
    async fn test_wrong_project_is_not_found() {
        let (engine, scope) = setup().await;
        let other = QueueScope::new(ProjectId::new(), scope.queue_id);
        let err = engine.stats(other).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_item_from_other_queue_is_not_found() {
        let (engine, scope) = setup().await;
        let other_queue = engine
            .queues()
            .create_queue(NewQueue::new(scope.project_id, "other"), Utc::now())
            .await
            .unwrap();
        let other_scope = QueueScope::from(&other_queue);
        engine
            .add_items(other_scope, vec![NewItem::new("x", ObjectType::Trace)])
            .await
            .unwrap();
        let foreign = engine.list_items(other_scope, &ItemFilter::default()).await.unwrap();

        let err = engine.get_item(scope, foreign[0].id).await.unwrap_err();
        assert!(matches!(err, QueueError::ItemNotFound(_)));
    }

    #[tokio::test]
    async fn test_bounded_times_out() {
        let (engine, _) = setup().await;
        let err = engine
            .bounded_for("slow", StdDuration::from_millis(10), async {
                tokio::time::sleep(StdDuration::from_secs(5)).await;
                Ok::<_, QueueError>(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::Timeout { operation: "slow", .. }));
    }

    #[tokio::test]
    async fn test_empty_object_id_rejected() {
        let (engine, scope) = setup().await;
        let err = engine
            .add_items(scope, vec![NewItem::new(" ", ObjectType::Trace)])
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::InvalidInput(_)));
    }
}
