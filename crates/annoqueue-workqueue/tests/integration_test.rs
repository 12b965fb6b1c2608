//! End-to-end tests for the annotation queue engine.
//!
//! Each scenario runs against both the in-memory and the SQLite store.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, TimeZone, Utc};
use tempfile::TempDir;

use annoqueue_workqueue::{
    AnnotationQueueEngine, ItemFilter, ItemStatus, ItemStore, LeaseSweeper, ManualClock, MemoryStore,
    NewItem, NewQueue, ObjectType, ProjectId, QueueDirectory, QueueError, QueueScope, SqliteStore,
    SweeperConfig, WorkerId,
};

// ============================================================================
// Test Helpers
// ============================================================================

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 7, 1, 9, 0, 0).unwrap()
}

struct Harness {
    engine: Arc<AnnotationQueueEngine>,
    items: Arc<dyn ItemStore>,
    queues: Arc<dyn QueueDirectory>,
    clock: Arc<ManualClock>,
    _dir: Option<TempDir>,
}

impl Harness {
    fn build(items: Arc<dyn ItemStore>, queues: Arc<dyn QueueDirectory>, dir: Option<TempDir>) -> Self {
        let clock = Arc::new(ManualClock::new(t0()));
        let engine = AnnotationQueueEngine::new(items.clone(), queues.clone()).with_clock(clock.clone());
        Self {
            engine: Arc::new(engine),
            items,
            queues,
            clock,
            _dir: dir,
        }
    }

    fn memory() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::build(store.clone(), store, None)
    }

    async fn sqlite() -> Self {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(
            SqliteStore::open(dir.path().join("annoqueue.db"), StdDuration::from_secs(5))
                .await
                .unwrap(),
        );
        Self::build(store.clone(), store, Some(dir))
    }

    async fn both() -> Vec<(&'static str, Self)> {
        vec![("memory", Self::memory()), ("sqlite", Self::sqlite().await)]
    }

    async fn queue(&self, lease_secs: i64) -> QueueScope {
        let queue = self
            .queues
            .create_queue(
                NewQueue::new(ProjectId::new(), format!("queue-{lease_secs}")).with_lease_secs(lease_secs),
                t0(),
            )
            .await
            .unwrap();
        QueueScope::from(&queue)
    }
}

fn trace(id: &str) -> NewItem {
    NewItem::new(id, ObjectType::Trace)
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_claim_complete_release_scenario() {
    for (name, h) in Harness::both().await {
        let scope = h.queue(300).await;
        h.engine
            .add_items(scope, vec![trace("A"), trace("B").with_priority(10)])
            .await
            .unwrap();
        let w1 = WorkerId::new("w1");
        let w2 = WorkerId::new("w2");

        let b = h.engine.claim_next(scope, &w1, &[]).await.unwrap();
        assert_eq!(b.object_id, "B", "{name}");

        let a = h.engine.claim_next(scope, &w2, &[]).await.unwrap();
        assert_eq!(a.object_id, "A", "{name}");

        h.engine.complete(scope, b.id, &w1, Vec::new()).await.unwrap();
        let stats = h.engine.stats(scope).await.unwrap();
        assert_eq!(stats.completed, 1, "{name}");
        assert_eq!(stats.pending, 1, "{name}");
        assert_eq!(stats.in_progress, 1, "{name}");

        let released = h.engine.release_lock(scope, a.id, &w2).await.unwrap();
        assert_eq!(released.status, ItemStatus::Pending, "{name}");
        assert!(released.locked_at.is_none(), "{name}");

        let again = h.engine.claim_next(scope, &w1, &[]).await.unwrap();
        assert_eq!(again.id, a.id, "{name}");
    }
}

#[tokio::test]
async fn test_duplicate_ingestion_counts_inserted_items() {
    for (name, h) in Harness::both().await {
        let scope = h.queue(300).await;
        let first = h.engine.add_items(scope, vec![trace("same")]).await.unwrap();
        let second = h.engine.add_items(scope, vec![trace("same")]).await.unwrap();
        assert_eq!((first, second), (1, 0), "{name}");

        let both = h
            .engine
            .add_items(scope, vec![NewItem::new("pair", ObjectType::Span), NewItem::new("pair", ObjectType::Span)])
            .await
            .unwrap();
        assert_eq!(both, 1, "{name}");
        assert_eq!(h.engine.stats(scope).await.unwrap().total, 2, "{name}");
    }
}

#[tokio::test]
async fn test_priority_and_fifo_order() {
    for (name, h) in Harness::both().await {
        let scope = h.queue(300).await;
        h.engine
            .add_items(
                scope,
                vec![
                    trace("first-5").with_priority(5),
                    trace("second-5").with_priority(5),
                    trace("ten").with_priority(10),
                    trace("zero"),
                ],
            )
            .await
            .unwrap();

        let mut order = Vec::new();
        for i in 0..4 {
            let item = h
                .engine
                .claim_next(scope, &WorkerId::new(format!("w{i}")), &[])
                .await
                .unwrap();
            order.push(item.object_id);
        }
        assert_eq!(order, vec!["ten", "first-5", "second-5", "zero"], "{name}");
    }
}

#[tokio::test]
async fn test_reclaim_is_idempotent() {
    for (name, h) in Harness::both().await {
        let scope = h.queue(300).await;
        h.engine.add_items(scope, vec![trace("x"), trace("y")]).await.unwrap();
        let w = WorkerId::new("w");

        let first = h.engine.claim_next(scope, &w, &[]).await.unwrap();
        h.clock.advance(Duration::seconds(42));
        let second = h.engine.claim_next(scope, &w, &[]).await.unwrap();

        assert_eq!(second.id, first.id, "{name}");
        assert_eq!(second.locked_at, Some(t0() + Duration::seconds(42)), "{name}");
    }
}

#[tokio::test]
async fn test_lease_expiry_boundary() {
    for (name, h) in Harness::both().await {
        let scope = h.queue(5).await;
        h.engine.add_items(scope, vec![trace("only")]).await.unwrap();
        let a = WorkerId::new("a");
        let b = WorkerId::new("b");
        h.engine.claim_next(scope, &a, &[]).await.unwrap();

        h.clock.set(t0() + Duration::milliseconds(4999));
        let err = h.engine.claim_next(scope, &b, &[]).await.unwrap_err();
        assert!(err.is_empty_result(), "{name}: {err}");

        h.clock.set(t0() + Duration::seconds(5));
        let item = h.engine.claim_next(scope, &b, &[]).await.unwrap();
        assert_eq!(item.locked_by, Some(b), "{name}");
    }
}

#[tokio::test]
async fn test_terminal_immutability() {
    for (name, h) in Harness::both().await {
        let scope = h.queue(300).await;
        h.engine.add_items(scope, vec![trace("t")]).await.unwrap();
        let w = WorkerId::new("w");
        let item = h.engine.claim_next(scope, &w, &[]).await.unwrap();
        h.engine.complete(scope, item.id, &w, Vec::new()).await.unwrap();

        for err in [
            h.engine.complete(scope, item.id, &w, Vec::new()).await.unwrap_err(),
            h.engine.skip(scope, item.id, &w, None).await.unwrap_err(),
        ] {
            assert!(matches!(err, QueueError::AlreadyTerminal { .. }), "{name}: {err}");
        }
        let err = h.engine.release_lock(scope, item.id, &w).await.unwrap_err();
        assert!(matches!(err, QueueError::NotLocked(_)), "{name}: {err}");
        assert!(h.engine.claim_next(scope, &w, &[]).await.unwrap_err().is_empty_result(), "{name}");

        h.engine.delete_item(scope, item.id).await.unwrap();
        assert!(h.engine.list_items(scope, &ItemFilter::default()).await.unwrap().is_empty(), "{name}");
    }
}

#[tokio::test]
async fn test_sweeper_releases_abandoned_items() {
    for (name, h) in Harness::both().await {
        let scope = h.queue(5).await;
        h.engine
            .add_items(scope, vec![trace("a"), trace("b"), trace("c"), trace("d")])
            .await
            .unwrap();
        for w in ["w1", "w2", "w3"] {
            h.engine.claim_next(scope, &WorkerId::new(w), &[]).await.unwrap();
        }
        h.clock.set(t0() + Duration::seconds(3));
        h.engine.claim_next(scope, &WorkerId::new("w4"), &[]).await.unwrap();

        h.clock.set(t0() + Duration::seconds(6));
        let sweeper = LeaseSweeper::new(h.items.clone(), h.queues.clone(), SweeperConfig::default())
            .with_clock(h.clock.clone());
        let report = sweeper.run_once().await.unwrap();
        assert_eq!(report.locks_released, 3, "{name}");

        let stats = h.engine.stats(scope).await.unwrap();
        assert_eq!(stats.in_progress, 1, "{name}");
        assert_eq!(stats.available(), 3, "{name}");
    }
}

#[tokio::test]
async fn test_wrong_project_is_not_found_not_conflict() {
    for (name, h) in Harness::both().await {
        let scope = h.queue(300).await;
        let foreign = QueueScope::new(ProjectId::new(), scope.queue_id);
        let err = h
            .engine
            .claim_next(foreign, &WorkerId::new("w"), &[])
            .await
            .unwrap_err();
        assert!(err.is_not_found(), "{name}: {err}");
        assert!(matches!(err, QueueError::ProjectMismatch { .. }), "{name}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mutual_exclusion_under_concurrency() {
    for (name, h) in Harness::both().await {
        let scope = h.queue(300).await;
        h.engine
            .add_items(scope, (0..8).map(|i| trace(&format!("t{i}"))).collect())
            .await
            .unwrap();

        let mut handles = Vec::new();
        for w in 0..12 {
            let engine = h.engine.clone();
            handles.push(tokio::spawn(async move {
                engine.claim_next(scope, &WorkerId::new(format!("w{w}")), &[]).await
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            match handle.await.unwrap() {
                Ok(item) => ids.push(item.id),
                Err(e) => assert!(e.is_empty_result(), "{name}: {e}"),
            }
        }
        let distinct: HashSet<_> = ids.iter().collect();
        assert_eq!(ids.len(), 8, "{name}");
        assert_eq!(distinct.len(), 8, "{name}");
    }
}
