//! Task-message envelope and queue consumer.
//!
//! The worker is driven by an external task runtime that pushes JSON
//! envelopes onto a single Redis list. The runtime itself (scheduling,
//! redelivery, dead-lettering) is not our concern — we pop, decode, and
//! dispatch. One tokio task per message; nothing is reported back.

use std::sync::Arc;

use anyhow::Context as _;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::tasks;
use crate::WorkerContext;

/// BLPOP wake-up interval; lets the loop notice shutdown promptly.
const POP_TIMEOUT_SECS: f64 = 5.0;

/// Wire envelope for one task invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum TaskMessage {
    /// Allocate `total` mailboxes for a job.
    AllocateBatch {
        site: String,
        domain: String,
        job_id: String,
        total: u32,
    },
    /// Wait for a verification code on one allocated mailbox.
    WaitForCode {
        box_id: String,
        job_id: String,
        item_id: u32,
    },
}

/// Pop and dispatch task messages until the connection fails.
///
/// Malformed payloads are logged and dropped — a bad message must never wedge
/// the queue. Entry-point errors (store failures) are logged per task.
pub async fn run_consumer(
    ctx: Arc<WorkerContext>,
    mut conn: ConnectionManager,
) -> anyhow::Result<()> {
    info!(queue = %ctx.config.queue_name, "task consumer started");

    loop {
        let popped: Option<(String, String)> = conn
            .blpop(&ctx.config.queue_name, POP_TIMEOUT_SECS)
            .await
            .context("popping from task queue")?;
        let Some((_, payload)) = popped else {
            continue;
        };

        match serde_json::from_str::<TaskMessage>(&payload) {
            Ok(msg) => {
                let ctx = Arc::clone(&ctx);
                tokio::spawn(async move {
                    dispatch(&ctx, msg).await;
                });
            }
            Err(err) => {
                warn!(err = %err, payload, "dropping malformed task message");
            }
        }
    }
}

async fn dispatch(ctx: &WorkerContext, msg: TaskMessage) {
    let outcome = match msg {
        TaskMessage::AllocateBatch {
            site,
            domain,
            job_id,
            total,
        } => tasks::allocate_batch(ctx, &site, &domain, &job_id, total).await,
        TaskMessage::WaitForCode {
            box_id,
            job_id,
            item_id,
        } => tasks::wait_for_code(ctx, &box_id, &job_id, item_id).await,
    };

    if let Err(err) = outcome {
        error!(err = %err, "task aborted on store failure");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_batch_envelope_round_trips() {
        let json = r#"{"task":"allocate_batch","site":"shop","domain":"mail.test","job_id":"j1","total":45}"#;
        let msg: TaskMessage = serde_json::from_str(json).unwrap();
        assert_eq!(
            msg,
            TaskMessage::AllocateBatch {
                site: "shop".into(),
                domain: "mail.test".into(),
                job_id: "j1".into(),
                total: 45,
            }
        );
        assert_eq!(serde_json::to_string(&msg).unwrap(), json);
    }

    #[test]
    fn wait_for_code_envelope_round_trips() {
        let json = r#"{"task":"wait_for_code","box_id":"box-9","job_id":"j1","item_id":7}"#;
        let msg: TaskMessage = serde_json::from_str(json).unwrap();
        assert_eq!(
            msg,
            TaskMessage::WaitForCode {
                box_id: "box-9".into(),
                job_id: "j1".into(),
                item_id: 7,
            }
        );
    }

    #[test]
    fn unknown_task_kinds_fail_to_decode() {
        let err = serde_json::from_str::<TaskMessage>(r#"{"task":"reticulate"}"#);
        assert!(err.is_err());
    }
}
