// SPDX-License-Identifier: MIT
//! Batch allocator — provisions N mailboxes for one job.
//!
//! The item range is split into fixed chunks processed sequentially; items
//! inside a chunk allocate concurrently, bounded by the process-wide
//! semaphore in [`WorkerContext`] (shared across jobs, not per chunk).
//! Chunk N+1 never starts before every allocation in chunk N has committed
//! its store writes.

use futures_util::future;
use tracing::{debug, info, warn};

use super::completion;
use crate::backoff::BackoffPolicy;
use crate::mail::{Allocation, MailApiError};
use crate::store::StoreError;
use crate::WorkerContext;

/// Items per sequential chunk.
pub const CHUNK_SIZE: u32 = 20;

/// Allocation attempts per item before the item is marked failed.
pub const ALLOCATE_RETRIES: u32 = 3;

/// Process-wide cap on simultaneous allocation calls. Local to each worker
/// process — many workers each enforce their own cap.
pub const MAX_CONCURRENT_ALLOCATIONS: usize = 10;

/// Allocate mailboxes for items `[0, total)` of a job.
///
/// Entirely side-effecting: progress lands in the store, nothing is returned
/// to the task runtime. Mail API failures never escape (they become `failed`
/// item records); store failures do, so the runtime can surface them.
pub async fn allocate_batch(
    ctx: &WorkerContext,
    site: &str,
    domain: &str,
    job_id: &str,
    total: u32,
) -> Result<(), StoreError> {
    info!(job_id, total, site, domain, "allocation batch started");

    for (start, end) in chunk_bounds(total) {
        let items = (start..end).map(|item_id| handle_item(ctx, site, domain, job_id, item_id));
        let results = future::join_all(items).await;
        for result in results {
            result?;
        }
        debug!(job_id, start, end, "allocation chunk committed");

        if !ctx.config.chunk_pause.is_zero() {
            tokio::time::sleep(ctx.config.chunk_pause).await;
        }
    }

    info!(job_id, total, "allocation batch finished");
    Ok(())
}

/// Sequential `[start, end)` chunk bounds covering `[0, total)`.
pub fn chunk_bounds(total: u32) -> Vec<(u32, u32)> {
    (0..total)
        .step_by(CHUNK_SIZE as usize)
        .map(|start| (start, (start + CHUNK_SIZE).min(total)))
        .collect()
}

async fn handle_item(
    ctx: &WorkerContext,
    site: &str,
    domain: &str,
    job_id: &str,
    item_id: u32,
) -> Result<(), StoreError> {
    match allocate_with_retry(ctx, site, domain, job_id, item_id).await {
        Ok(Allocation { email, box_id }) => {
            ctx.store
                .mark_item_allocated(job_id, item_id, &email, &box_id)
                .await?;
            ctx.store.incr_allocated(job_id).await?;
            // Not terminal yet: the wait task records this item as done.
            Ok(())
        }
        Err(err) => {
            warn!(job_id, item_id, err = %err, "allocation failed permanently");
            ctx.store
                .mark_item_failed(job_id, item_id, &format!("allocate error: {err}"))
                .await?;
            completion::record_item_done(ctx.store.as_ref(), job_id).await
        }
    }
}

/// Up to [`ALLOCATE_RETRIES`] attempts with a fixed delay between them.
/// The semaphore permit is held per attempt, so a sleeping retry does not
/// starve other items of allocation slots.
async fn allocate_with_retry(
    ctx: &WorkerContext,
    site: &str,
    domain: &str,
    job_id: &str,
    item_id: u32,
) -> Result<Allocation, MailApiError> {
    let policy = BackoffPolicy::fixed(ctx.config.allocate_retry_delay);
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        let allocation = {
            let _permit = ctx
                .allocate_permits
                .acquire()
                .await
                .expect("allocation semaphore is never closed");
            ctx.mail.allocate(site, domain).await
        };

        match allocation {
            Ok(alloc) => {
                if attempt > 1 {
                    debug!(job_id, item_id, attempt, "allocation retry succeeded");
                }
                return Ok(alloc);
            }
            Err(err) if attempt < ALLOCATE_RETRIES => {
                let delay = policy.delay_for(attempt);
                warn!(
                    job_id,
                    item_id,
                    attempt,
                    max = ALLOCATE_RETRIES,
                    delay_ms = delay.as_millis() as u64,
                    err = %err,
                    "allocation attempt failed — retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}
