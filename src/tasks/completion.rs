//! Job completion tracking.
//!
//! Invoked by the batch allocator (for items that fail allocation) and by the
//! code waiter (for everything else) — exactly once per terminal item.

use tracing::info;

use crate::store::{ProgressStore, StoreError};

/// Count one terminal item against the job and finalize the job when the
/// last one lands.
///
/// The increment is atomic at the store level; the completion check is a
/// best-effort follow-up. Two concurrent callers can both observe
/// `done >= total` and both write `completed` — the write is idempotent, so
/// the race is benign. A job whose record is missing or not yet seeded
/// (`total == 0`) is left in progress.
pub async fn record_item_done(store: &dyn ProgressStore, job_id: &str) -> Result<(), StoreError> {
    let done = store.incr_done(job_id).await?;
    let total = store.job_total(job_id).await?;
    if total > 0 && done >= total {
        store.mark_job_completed(job_id).await?;
        info!(job_id, done, total, "job completed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{JobState, MemoryStore};
    use std::sync::Arc;

    #[tokio::test]
    async fn completes_exactly_when_done_reaches_total() {
        let store = MemoryStore::new();
        store.create_job("j1", 3).await.unwrap();

        record_item_done(&store, "j1").await.unwrap();
        record_item_done(&store, "j1").await.unwrap();
        let job = store.job("j1").await.unwrap().unwrap();
        assert_eq!(job.done, 2);
        assert_eq!(job.state, JobState::InProgress);

        record_item_done(&store, "j1").await.unwrap();
        let job = store.job("j1").await.unwrap().unwrap();
        assert_eq!(job.done, 3);
        assert_eq!(job.state, JobState::Completed);
    }

    #[tokio::test]
    async fn unseeded_job_is_never_completed() {
        let store = MemoryStore::new();
        record_item_done(&store, "ghost").await.unwrap();
        let job = store.job("ghost").await.unwrap().unwrap();
        assert_eq!(job.done, 1);
        assert_eq!(job.state, JobState::InProgress);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_converge_on_completed() {
        // The accepted race: several tasks may all see done >= total and all
        // write `completed`. The result must still be exactly one terminal
        // count per item and a completed job.
        let store = Arc::new(MemoryStore::new());
        let total: u64 = 32;
        store.create_job("j1", total).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..total {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                record_item_done(store.as_ref(), "j1").await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let job = store.job("j1").await.unwrap().unwrap();
        assert_eq!(job.done, total);
        assert_eq!(job.state, JobState::Completed);
    }
}
