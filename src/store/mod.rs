// SPDX-License-Identifier: MIT
//! Progress store — typed accessor over the remote key-value store.
//!
//! All durable state lives here; the worker process itself holds nothing.
//! Keyspace:
//! - `job:{job_id}` → hash `total, allocated, done, state, updated_at`
//! - `task:{job_id}:{item_id}` → hash `email, box_id, state, error, msg_id, updated_at`
//! - `mbox:{box_id}:messages` → list of `msg_id` (message TTL)
//! - `{msg_id}` → hash of message fields (message TTL)
//! - `lock:wait:{job_id}:{item_id}` → presence marker for an in-flight wait
//!
//! Every mutation is a single store operation; there are no multi-key
//! transactions. Readers must tolerate partial records (a crash between two
//! related writes leaves the job in progress, not corrupt).

pub mod memory;
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

// ─── Keys ────────────────────────────────────────────────────────────────────

pub fn job_key(job_id: &str) -> String {
    format!("job:{job_id}")
}

pub fn task_key(job_id: &str, item_id: u32) -> String {
    format!("task:{job_id}:{item_id}")
}

pub fn mbox_list_key(box_id: &str) -> String {
    format!("mbox:{box_id}:messages")
}

pub fn wait_lock_key(job_id: &str, item_id: u32) -> String {
    format!("lock:wait:{job_id}:{item_id}")
}

/// Second-precision UTC timestamp, `2026-08-29T12:00:00Z` style.
/// Written into `updated_at` / `ts` fields on every mutation.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

// ─── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("malformed field {field}={value:?} in {key}")]
    MalformedField {
        key: String,
        field: String,
        value: String,
    },
}

// ─── Records ─────────────────────────────────────────────────────────────────

/// Job lifecycle: `in_progress` until every item is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    InProgress,
    Completed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::InProgress => "in_progress",
            JobState::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "in_progress" => Some(JobState::InProgress),
            "completed" => Some(JobState::Completed),
            _ => None,
        }
    }
}

/// Per-item state machine:
/// `(none) → allocated → message_received` or `(none|allocated) → failed`.
/// `message_received` and `failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    Allocated,
    MessageReceived,
    Failed,
}

impl ItemState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemState::Allocated => "allocated",
            ItemState::MessageReceived => "message_received",
            ItemState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "allocated" => Some(ItemState::Allocated),
            "message_received" => Some(ItemState::MessageReceived),
            "failed" => Some(ItemState::Failed),
            _ => None,
        }
    }
}

/// Read view of a `job:{job_id}` hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub total: u64,
    pub allocated: u64,
    pub done: u64,
    pub state: JobState,
    pub updated_at: String,
}

/// Read view of a `task:{job_id}:{item_id}` hash.
///
/// `state` is `None` for a record that exists but has no recognizable state
/// field (partial write) — callers treat that as in-progress.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskItemRecord {
    pub email: Option<String>,
    pub box_id: Option<String>,
    pub state: Option<ItemState>,
    pub error: Option<String>,
    pub msg_id: Option<String>,
    pub updated_at: Option<String>,
}

/// One received verification message. Immutable once written; the optional
/// fields are omitted from the stored hash when absent, never written empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub msg_id: String,
    pub box_id: String,
    pub ts: String,
    #[serde(rename = "from", skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl MessageRecord {
    /// The optional hash fields in storage order, present ones only.
    pub fn present_fields(&self) -> Vec<(&'static str, &str)> {
        let mut fields = Vec::new();
        let optional: [(&'static str, &Option<String>); 7] = [
            ("from", &self.sender),
            ("subject", &self.subject),
            ("snippet", &self.snippet),
            ("text", &self.text),
            ("html", &self.html),
            ("headers", &self.headers),
            ("code", &self.code),
        ];
        for (name, value) in optional {
            if let Some(v) = value {
                fields.push((name, v.as_str()));
            }
        }
        fields
    }
}

// ─── Store trait ─────────────────────────────────────────────────────────────

/// Typed progress-store operations. One implementation talks to Redis
/// ([`RedisStore`]); [`MemoryStore`] backs tests.
///
/// The handle is injected explicitly through [`crate::WorkerContext`] — it is
/// a scoped resource acquired once per process, never an implicit
/// context-local lookup.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Seed a job record: `total`, zeroed counters, `in_progress`.
    /// Production jobs are usually pre-seeded by the caller that enqueues the
    /// batch; this exists for tests and operator tooling.
    async fn create_job(&self, job_id: &str, total: u64) -> Result<(), StoreError>;

    /// Overwrite the item's allocation fields and set `state=allocated`.
    async fn mark_item_allocated(
        &self,
        job_id: &str,
        item_id: u32,
        email: &str,
        box_id: &str,
    ) -> Result<(), StoreError>;

    /// Overwrite `state=failed` with a human-readable error. Fields from an
    /// earlier allocation (email, box_id) persist in the hash.
    async fn mark_item_failed(
        &self,
        job_id: &str,
        item_id: u32,
        error: &str,
    ) -> Result<(), StoreError>;

    /// Overwrite `state=message_received` and record the message id.
    async fn mark_item_received(
        &self,
        job_id: &str,
        item_id: u32,
        msg_id: &str,
    ) -> Result<(), StoreError>;

    /// Atomically increment the job's `allocated` counter.
    async fn incr_allocated(&self, job_id: &str) -> Result<u64, StoreError>;

    /// Atomically increment the job's `done` counter; returns the new value.
    async fn incr_done(&self, job_id: &str) -> Result<u64, StoreError>;

    /// The job's target item count. 0 when the job record is missing or not
    /// yet seeded (treated as in-progress by callers).
    async fn job_total(&self, job_id: &str) -> Result<u64, StoreError>;

    /// Best-effort completion write; idempotent, safe to race.
    async fn mark_job_completed(&self, job_id: &str) -> Result<(), StoreError>;

    /// Persist a message hash, append its id to the mailbox list, and set the
    /// same TTL on both keys.
    async fn store_message(&self, msg: &MessageRecord, ttl: Duration) -> Result<(), StoreError>;

    /// Advisory marker for an in-flight wait attempt. Set by the caller that
    /// enqueues the wait task; the TTL is a safety net only.
    async fn set_wait_lock(
        &self,
        job_id: &str,
        item_id: u32,
        ttl: Duration,
    ) -> Result<(), StoreError>;

    async fn wait_lock_exists(&self, job_id: &str, item_id: u32) -> Result<bool, StoreError>;

    /// Remove the wait lock. Runs unconditionally at the end of every wait
    /// attempt, success or failure.
    async fn delete_wait_lock(&self, job_id: &str, item_id: u32) -> Result<(), StoreError>;

    // Read side (tests, operator tooling, the external progress consumer).

    async fn job(&self, job_id: &str) -> Result<Option<JobRecord>, StoreError>;

    async fn task_item(
        &self,
        job_id: &str,
        item_id: u32,
    ) -> Result<Option<TaskItemRecord>, StoreError>;

    async fn message(&self, msg_id: &str) -> Result<Option<MessageRecord>, StoreError>;

    /// Message ids appended to a mailbox, oldest first.
    async fn mailbox_messages(&self, box_id: &str) -> Result<Vec<String>, StoreError>;
}
