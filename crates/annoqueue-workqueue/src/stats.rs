//! Derived queue statistics.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::item::{Item, ItemStatus};

/// Per-queue counts. Never persisted.
///
/// `pending` counts every pending item; `in_progress` is the subset whose
/// lease is live at the time the stats were taken.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub total: u64,
    pub pending: u64,
    pub in_progress: u64,
    pub completed: u64,
    pub skipped: u64,
}

impl QueueStats {
    /// Aggregate over a queue's items.
    pub fn from_items<'a>(
        items: impl IntoIterator<Item = &'a Item>,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Self {
        let mut stats = QueueStats::default();
        for item in items {
            stats.total += 1;
            match item.status {
                ItemStatus::Pending => {
                    stats.pending += 1;
                    if item.is_locked(now, lease) {
                        stats.in_progress += 1;
                    }
                }
                ItemStatus::Completed => stats.completed += 1,
                ItemStatus::Skipped => stats.skipped += 1,
            }
        }
        stats
    }

    /// Pending items nobody currently holds.
    pub fn available(&self) -> u64 {
        self.pending - self.in_progress
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{QueueId, WorkerId};
    use crate::item::{NewItem, ObjectType};

    #[test]
    fn test_stats_derive_in_progress_from_lease() {
        let now = Utc::now();
        let lease = Duration::seconds(60);
        let queue = QueueId::new();
        let worker = WorkerId::new("w");

        let free = NewItem::new("a", ObjectType::Trace).into_item(queue, now);
        let mut live = NewItem::new("b", ObjectType::Trace).into_item(queue, now);
        live.apply_lock(&worker, now - Duration::seconds(10));
        let mut stale = NewItem::new("c", ObjectType::Trace).into_item(queue, now);
        stale.apply_lock(&worker, now - Duration::seconds(61));
        let mut done = NewItem::new("d", ObjectType::Span).into_item(queue, now);
        done.apply_terminal(ItemStatus::Completed, &worker, now);
        let mut skipped = NewItem::new("e", ObjectType::Span).into_item(queue, now);
        skipped.apply_terminal(ItemStatus::Skipped, &worker, now);

        let items = [free, live, stale, done, skipped];
        let stats = QueueStats::from_items(items.iter(), now, lease);
        assert_eq!(
            stats,
            QueueStats {
                total: 5,
                pending: 3,
                in_progress: 1,
                completed: 1,
                skipped: 1,
            }
        );
        assert_eq!(stats.available(), 2);
    }
}
