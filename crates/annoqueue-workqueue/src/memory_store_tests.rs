use super::*;
use std::time::Duration as StdDuration;

use chrono::TimeZone;

use crate::item::{ItemStatus, ObjectType};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
}

async fn store_with_queue() -> (MemoryStore, Queue) {
    let store = MemoryStore::new();
    let queue = store
        .create_queue(NewQueue::new(ProjectId::new(), "review"), t0())
        .await
        .unwrap();
    (store, queue)
}

fn request(queue: &Queue, worker: &str, now: DateTime<Utc>) -> ClaimRequest {
    ClaimRequest::new(queue.id, WorkerId::new(worker), Duration::seconds(300), now)
}

#[tokio::test]
async fn test_duplicate_queue_name_rejected_per_project() {
    let (store, queue) = store_with_queue().await;
    let err = store
        .create_queue(NewQueue::new(queue.project_id, "review"), t0())
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::DuplicateQueueName { .. }));

    // Same name in another project is fine.
    store
        .create_queue(NewQueue::new(ProjectId::new(), "review"), t0())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_get_queue_distinguishes_absent_from_wrong_project() {
    let (store, queue) = store_with_queue().await;

    let err = store.get_queue(QueueId::new(), queue.project_id).await.unwrap_err();
    assert!(matches!(err, QueueError::QueueNotFound(_)));

    let err = store.get_queue(queue.id, ProjectId::new()).await.unwrap_err();
    assert!(matches!(err, QueueError::ProjectMismatch { .. }));
}

#[tokio::test]
async fn test_active_listing_spans_projects() {
    let (store, queue) = store_with_queue().await;
    let other = store
        .create_queue(NewQueue::new(ProjectId::new(), "other"), t0())
        .await
        .unwrap();
    let paused = store
        .create_queue(NewQueue::new(queue.project_id, "paused"), t0())
        .await
        .unwrap();
    store
        .set_queue_status(paused.id, paused.project_id, QueueStatus::Paused, t0())
        .await
        .unwrap();

    let mut active: Vec<QueueId> = store
        .list_active_queues_all_projects()
        .await
        .unwrap()
        .into_iter()
        .map(|q| q.id)
        .collect();
    active.sort_by_key(|id| id.to_string());
    let mut expected = vec![queue.id, other.id];
    expected.sort_by_key(|id| id.to_string());
    assert_eq!(active, expected);

    assert_eq!(store.list_queues(queue.project_id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_insert_into_unknown_queue_fails() {
    let store = MemoryStore::new();
    let err = store
        .insert_items(QueueId::new(), vec![NewItem::new("t", ObjectType::Trace)], t0())
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::QueueNotFound(_)));
}

#[tokio::test]
async fn test_duplicates_inside_one_batch_are_skipped() {
    let (store, queue) = store_with_queue().await;
    let inserted = store
        .insert_items(
            queue.id,
            vec![
                NewItem::new("t", ObjectType::Trace),
                NewItem::new("t", ObjectType::Trace),
            ],
            t0(),
        )
        .await
        .unwrap();
    assert_eq!(inserted, 1);
}

#[tokio::test]
async fn test_find_claimable_locks_first_in_order() {
    let (store, queue) = store_with_queue().await;
    store
        .insert_items(
            queue.id,
            vec![
                NewItem::new("low", ObjectType::Trace),
                NewItem::new("high", ObjectType::Trace).with_priority(3),
            ],
            t0(),
        )
        .await
        .unwrap();

    let claimed = store
        .find_claimable(&request(&queue, "a", t0()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(claimed.object_id, "high");
    assert_eq!(claimed.locked_by, Some(WorkerId::new("a")));

    let next = store
        .find_claimable(&request(&queue, "b", t0()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(next.object_id, "low");

    assert!(store.find_claimable(&request(&queue, "c", t0())).await.unwrap().is_none());
}

#[tokio::test]
async fn test_find_claimable_respects_expired_deadline() {
    let (store, queue) = store_with_queue().await;
    store
        .insert_items(queue.id, vec![NewItem::new("t", ObjectType::Trace)], t0())
        .await
        .unwrap();

    let expired = request(&queue, "a", t0()).with_budget(StdDuration::ZERO);
    let err = store.find_claimable(&expired).await.unwrap_err();
    assert!(matches!(err, QueueError::Timeout { operation: "claim", .. }));

    let items = store.list_items(queue.id, &ItemFilter::default()).await.unwrap();
    assert!(items[0].locked_at.is_none());
}

#[tokio::test]
async fn test_set_lock_is_compare_and_set() {
    let (store, queue) = store_with_queue().await;
    store
        .insert_items(queue.id, vec![NewItem::new("t", ObjectType::Trace)], t0())
        .await
        .unwrap();
    let item = store.list_items(queue.id, &ItemFilter::default()).await.unwrap().remove(0);
    let snapshot = item.lock_snapshot();

    assert!(store.set_lock(item.id, &snapshot, &WorkerId::new("a"), t0()).await.unwrap());
    // The snapshot is stale now.
    assert!(!store.set_lock(item.id, &snapshot, &WorkerId::new("b"), t0()).await.unwrap());
}

#[tokio::test]
async fn test_bulk_clear_only_touches_expired_pending_items() {
    let (store, queue) = store_with_queue().await;
    store
        .insert_items(
            queue.id,
            vec![
                NewItem::new("old", ObjectType::Trace),
                NewItem::new("fresh", ObjectType::Trace),
                NewItem::new("done", ObjectType::Trace),
            ],
            t0(),
        )
        .await
        .unwrap();
    let items = store.list_items(queue.id, &ItemFilter::default()).await.unwrap();
    let worker = WorkerId::new("w");
    let id_of = |name: &str| items.iter().find(|i| i.object_id == name).unwrap().id;

    let none = LockSnapshot::default();
    store.set_lock(id_of("old"), &none, &worker, t0()).await.unwrap();
    store
        .set_lock(id_of("fresh"), &none, &worker, t0() + Duration::seconds(3))
        .await
        .unwrap();
    store
        .transition(&TransitionRequest {
            item_id: id_of("done"),
            status: ItemStatus::Completed,
            worker: worker.clone(),
            now: t0(),
            lease: Duration::seconds(5),
        })
        .await
        .unwrap();

    let released = store
        .bulk_clear_expired_locks(queue.id, Duration::seconds(5), t0() + Duration::seconds(6))
        .await
        .unwrap();
    assert_eq!(released, 1);

    let old = store.get_item(id_of("old")).await.unwrap().unwrap();
    assert!(old.locked_at.is_none());
    let fresh = store.get_item(id_of("fresh")).await.unwrap().unwrap();
    assert_eq!(fresh.locked_by, Some(worker));
}

#[tokio::test]
async fn test_delete_queue_cascades() {
    let (store, queue) = store_with_queue().await;
    store
        .insert_items(queue.id, vec![NewItem::new("t", ObjectType::Trace)], t0())
        .await
        .unwrap();
    store
        .assign(queue.id, &WorkerId::new("a"), AssignmentRole::Annotator, t0())
        .await
        .unwrap();

    store.delete_queue(queue.id, queue.project_id).await.unwrap();

    assert!(store.list_items(queue.id, &ItemFilter::default()).await.unwrap().is_empty());
    assert!(store.list_assignments(queue.id).await.unwrap().is_empty());
    assert!(store.get_queue(queue.id, queue.project_id).await.is_err());
}

#[tokio::test]
async fn test_assignments_upsert_and_gate() {
    let (store, queue) = store_with_queue().await;
    let worker = WorkerId::new("ann");

    store
        .assign(queue.id, &worker, AssignmentRole::Annotator, t0())
        .await
        .unwrap();
    assert!(store.check_access(queue.id, &worker, AssignmentRole::Annotator).await.unwrap());
    assert!(!store.check_access(queue.id, &worker, AssignmentRole::Reviewer).await.unwrap());

    let upgraded = store
        .assign(queue.id, &worker, AssignmentRole::Admin, t0() + Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(upgraded.role, AssignmentRole::Admin);
    assert_eq!(upgraded.created_at, t0());
    assert_eq!(store.list_assignments(queue.id).await.unwrap().len(), 1);

    assert!(store.unassign(queue.id, &worker).await.unwrap());
    assert!(!store.unassign(queue.id, &worker).await.unwrap());
    assert!(!store.check_access(queue.id, &worker, AssignmentRole::Annotator).await.unwrap());
}

#[tokio::test]
async fn test_list_items_paging() {
    let (store, queue) = store_with_queue().await;
    let batch = (0..5)
        .map(|i| NewItem::new(format!("t{i}"), ObjectType::Trace))
        .collect();
    store.insert_items(queue.id, batch, t0()).await.unwrap();

    let filter = ItemFilter {
        status: Some(ItemStatus::Pending),
        limit: Some(2),
        offset: 1,
    };
    let page = store.list_items(queue.id, &filter).await.unwrap();
    let names: Vec<&str> = page.iter().map(|i| i.object_id.as_str()).collect();
    assert_eq!(names, vec!["t1", "t2"]);
}
