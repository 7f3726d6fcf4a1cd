// SPDX-License-Identifier: MIT
//! Code waiter — drives one poll-until-arrival attempt for one mailbox.

use tracing::{info, warn};

use super::completion;
use crate::store::StoreError;
use crate::WorkerContext;

/// Wait for a verification code on `box_id` and publish the outcome.
///
/// On success the message is persisted (present fields only), appended to the
/// mailbox list with the configured TTL on both keys, and the item becomes
/// `message_received`. Any failure — timeout included — becomes a `failed`
/// item record instead of escaping. The wait lock is deleted and the item is
/// counted as done on every path.
pub async fn wait_for_code(
    ctx: &WorkerContext,
    box_id: &str,
    job_id: &str,
    item_id: u32,
) -> Result<(), StoreError> {
    let outcome = ctx.mail.wait_for_code(box_id, ctx.config.wait_timeout).await;

    let publish = match outcome {
        Ok(msg) => {
            let msg_id = msg.msg_id.clone();
            info!(job_id, item_id, box_id, msg_id, "message received");
            match ctx.store.store_message(&msg, ctx.config.message_ttl).await {
                Ok(()) => ctx.store.mark_item_received(job_id, item_id, &msg_id).await,
                Err(err) => Err(err),
            }
        }
        Err(err) => {
            warn!(job_id, item_id, box_id, err = %err, "wait for code failed");
            ctx.store
                .mark_item_failed(job_id, item_id, &err.to_string())
                .await
        }
    };

    // Cleanup runs regardless of how publishing went; the first store error
    // is still reported to the caller.
    let cleanup = async {
        ctx.store.delete_wait_lock(job_id, item_id).await?;
        completion::record_item_done(ctx.store.as_ref(), job_id).await
    }
    .await;

    publish.and(cleanup)
}
