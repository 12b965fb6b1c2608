//! Claim-next.
//!
//! A claim selects the best eligible item and leases it to the worker as one
//! isolated step inside the store. The engine wraps that step with the
//! queue checks, a per-attempt deadline and a bounded retry on contention.

use std::time::Duration as StdDuration;

use tracing::{debug, info, warn};

use crate::engine::{AnnotationQueueEngine, QueueScope};
use crate::error::QueueError;
use crate::ids::{ItemId, WorkerId};
use crate::item::Item;
use crate::store::{ClaimRequest, ItemStore};

/// Candidates fetched per compare-and-set round.
const CAS_BATCH: usize = 8;

/// Rounds of candidate fetching before giving up on a contended queue.
const MAX_CAS_ROUNDS: usize = 4;

/// Extra time the outer timeout allows over the store's own deadline, so the
/// store normally aborts (and rolls back) before the future is dropped.
const CLAIM_GRACE: StdDuration = StdDuration::from_millis(250);

/// Claim through `claim_candidates` + `set_lock`.
///
/// Used by stores without a native select-and-lock. A lost race only moves
/// on to the next candidate; a queue where every round loses reports
/// `Busy` so the engine's retry applies.
pub(crate) async fn claim_by_compare_and_set<S>(store: &S, request: &ClaimRequest) -> Result<Option<Item>, QueueError>
where
    S: ItemStore + ?Sized,
{
    for _ in 0..MAX_CAS_ROUNDS {
        request.check_deadline()?;
        let candidates = store.claim_candidates(request, CAS_BATCH).await?;
        if candidates.is_empty() {
            return Ok(None);
        }

        for candidate in candidates {
            request.check_deadline()?;
            let expected = candidate.lock_snapshot();
            if store
                .set_lock(candidate.id, &expected, &request.worker, request.now)
                .await?
            {
                let mut claimed = candidate;
                claimed.apply_lock(&request.worker, request.now);
                return Ok(Some(claimed));
            }
            debug!("Lost lock race on item {}", candidate.id);
        }
    }

    Err(QueueError::Busy(format!(
        "claim on queue {} lost every compare-and-set round",
        request.queue_id
    )))
}

impl AnnotationQueueEngine {
    /// Lease the next eligible item of the queue to `worker`.
    ///
    /// Eligible means pending, not in `excluded`, and either unlocked, held
    /// under an expired lease, or already held by `worker` (a reclaim, which
    /// refreshes the lease). Order is priority descending, then oldest first.
    ///
    /// Returns `NoItemsAvailable` when nothing qualifies.
    pub async fn claim_next(
        &self,
        scope: QueueScope,
        worker: &WorkerId,
        excluded: &[ItemId],
    ) -> Result<Item, QueueError> {
        let queue = self.resolve_queue(scope).await?;
        if !queue.is_active() {
            return Err(QueueError::QueueNotActive {
                queue: queue.id,
                status: queue.status,
            });
        }
        let lease = self.lease_for(&queue);
        let budget = self.config.store_timeout();
        let attempts = self.config.claim_attempts();

        let mut attempt = 0;
        loop {
            attempt += 1;
            let request = ClaimRequest::new(queue.id, worker.clone(), lease, self.now())
                .with_excluded(excluded.to_vec())
                .with_budget(budget);

            let result = self
                .bounded_for("claim", budget + CLAIM_GRACE, self.items.find_claimable(&request))
                .await;

            match result {
                Ok(Some(item)) => {
                    info!(
                        "Worker {} claimed item {} in queue {} (priority {})",
                        worker, item.id, queue.id, item.priority
                    );
                    return Ok(item);
                }
                Ok(None) => {
                    debug!("No claimable items in queue {} for worker {}", queue.id, worker);
                    return Err(QueueError::NoItemsAvailable);
                }
                Err(e) if e.is_transient() && attempt < attempts => {
                    warn!(
                        "Claim attempt {}/{} on queue {} failed: {}",
                        attempt, attempts, queue.id, e
                    );
                    tokio::time::sleep(self.config.claim_retry_backoff()).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
#[path = "claim_tests.rs"]
mod tests;
