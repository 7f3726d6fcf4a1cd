// SPDX-License-Identifier: MIT
//! Redis-backed [`ProgressStore`].
//!
//! One [`ConnectionManager`] per process (it multiplexes and reconnects
//! internally; clones share the underlying connection). Counter updates use
//! `HINCRBY`, which is atomic on the server — that is the only atomicity the
//! completion tracker relies on.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::{
    job_key, mbox_list_key, now_iso, task_key, wait_lock_key, ItemState, JobRecord, JobState,
    MessageRecord, ProgressStore, StoreError, TaskItemRecord,
};

pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// Open a client and establish the shared connection manager.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }

    /// Bump a job hash counter and refresh `updated_at` (two single-key
    /// operations; only the increment needs to be atomic).
    async fn incr_job_field(&self, job_id: &str, field: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn();
        let key = job_key(job_id);
        let value: u64 = conn.hincr(&key, field, 1i64).await?;
        let _: () = conn.hset(&key, "updated_at", now_iso()).await?;
        Ok(value)
    }
}

fn parse_u64(map: &HashMap<String, String>, key: &str, field: &str) -> Result<u64, StoreError> {
    match map.get(field) {
        None => Ok(0),
        Some(raw) => raw.parse::<u64>().map_err(|_| StoreError::MalformedField {
            key: key.to_string(),
            field: field.to_string(),
            value: raw.clone(),
        }),
    }
}

#[async_trait]
impl ProgressStore for RedisStore {
    async fn create_job(&self, job_id: &str, total: u64) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let _: () = conn
            .hset_multiple(
                job_key(job_id),
                &[
                    ("total", total.to_string()),
                    ("allocated", "0".to_string()),
                    ("done", "0".to_string()),
                    ("state", JobState::InProgress.as_str().to_string()),
                    ("updated_at", now_iso()),
                ],
            )
            .await?;
        Ok(())
    }

    async fn mark_item_allocated(
        &self,
        job_id: &str,
        item_id: u32,
        email: &str,
        box_id: &str,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let _: () = conn
            .hset_multiple(
                task_key(job_id, item_id),
                &[
                    ("email", email.to_string()),
                    ("box_id", box_id.to_string()),
                    ("state", ItemState::Allocated.as_str().to_string()),
                    ("updated_at", now_iso()),
                ],
            )
            .await?;
        Ok(())
    }

    async fn mark_item_failed(
        &self,
        job_id: &str,
        item_id: u32,
        error: &str,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let _: () = conn
            .hset_multiple(
                task_key(job_id, item_id),
                &[
                    ("state", ItemState::Failed.as_str().to_string()),
                    ("error", error.to_string()),
                    ("updated_at", now_iso()),
                ],
            )
            .await?;
        Ok(())
    }

    async fn mark_item_received(
        &self,
        job_id: &str,
        item_id: u32,
        msg_id: &str,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let _: () = conn
            .hset_multiple(
                task_key(job_id, item_id),
                &[
                    ("state", ItemState::MessageReceived.as_str().to_string()),
                    ("msg_id", msg_id.to_string()),
                    ("updated_at", now_iso()),
                ],
            )
            .await?;
        Ok(())
    }

    async fn incr_allocated(&self, job_id: &str) -> Result<u64, StoreError> {
        self.incr_job_field(job_id, "allocated").await
    }

    async fn incr_done(&self, job_id: &str) -> Result<u64, StoreError> {
        self.incr_job_field(job_id, "done").await
    }

    async fn job_total(&self, job_id: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn();
        let total: Option<String> = conn.hget(job_key(job_id), "total").await?;
        match total {
            None => Ok(0),
            Some(raw) => raw.parse::<u64>().map_err(|_| StoreError::MalformedField {
                key: job_key(job_id),
                field: "total".to_string(),
                value: raw,
            }),
        }
    }

    async fn mark_job_completed(&self, job_id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let _: () = conn
            .hset_multiple(
                job_key(job_id),
                &[
                    ("state", JobState::Completed.as_str().to_string()),
                    ("updated_at", now_iso()),
                ],
            )
            .await?;
        Ok(())
    }

    async fn store_message(&self, msg: &MessageRecord, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn();

        let mut fields: Vec<(&str, String)> = vec![
            ("box_id", msg.box_id.clone()),
            ("ts", msg.ts.clone()),
        ];
        for (name, value) in msg.present_fields() {
            fields.push((name, value.to_string()));
        }
        let _: () = conn.hset_multiple(&msg.msg_id, &fields).await?;

        let list = mbox_list_key(&msg.box_id);
        let _: () = conn.rpush(&list, &msg.msg_id).await?;

        // Same TTL on the record and its list membership; both expire together.
        let secs = ttl.as_secs() as i64;
        let _: bool = conn.expire(&msg.msg_id, secs).await?;
        let _: bool = conn.expire(&list, secs).await?;
        Ok(())
    }

    async fn set_wait_lock(
        &self,
        job_id: &str,
        item_id: u32,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let _: () = conn
            .set_ex(wait_lock_key(job_id, item_id), 1, ttl.as_secs())
            .await?;
        Ok(())
    }

    async fn wait_lock_exists(&self, job_id: &str, item_id: u32) -> Result<bool, StoreError> {
        let mut conn = self.conn();
        Ok(conn.exists(wait_lock_key(job_id, item_id)).await?)
    }

    async fn delete_wait_lock(&self, job_id: &str, item_id: u32) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let _: () = conn.del(wait_lock_key(job_id, item_id)).await?;
        Ok(())
    }

    async fn job(&self, job_id: &str) -> Result<Option<JobRecord>, StoreError> {
        let mut conn = self.conn();
        let key = job_key(job_id);
        let map: HashMap<String, String> = conn.hgetall(&key).await?;
        if map.is_empty() {
            return Ok(None);
        }
        let state = map
            .get("state")
            .and_then(|s| JobState::parse(s))
            // Partial record (e.g. counters incremented before seeding):
            // still in progress, never corrupt.
            .unwrap_or(JobState::InProgress);
        Ok(Some(JobRecord {
            total: parse_u64(&map, &key, "total")?,
            allocated: parse_u64(&map, &key, "allocated")?,
            done: parse_u64(&map, &key, "done")?,
            state,
            updated_at: map.get("updated_at").cloned().unwrap_or_default(),
        }))
    }

    async fn task_item(
        &self,
        job_id: &str,
        item_id: u32,
    ) -> Result<Option<TaskItemRecord>, StoreError> {
        let mut conn = self.conn();
        let map: HashMap<String, String> = conn.hgetall(task_key(job_id, item_id)).await?;
        if map.is_empty() {
            return Ok(None);
        }
        Ok(Some(TaskItemRecord {
            email: map.get("email").cloned(),
            box_id: map.get("box_id").cloned(),
            state: map.get("state").and_then(|s| ItemState::parse(s)),
            error: map.get("error").cloned(),
            msg_id: map.get("msg_id").cloned(),
            updated_at: map.get("updated_at").cloned(),
        }))
    }

    async fn message(&self, msg_id: &str) -> Result<Option<MessageRecord>, StoreError> {
        let mut conn = self.conn();
        let map: HashMap<String, String> = conn.hgetall(msg_id).await?;
        if map.is_empty() {
            return Ok(None);
        }
        Ok(Some(MessageRecord {
            msg_id: msg_id.to_string(),
            box_id: map.get("box_id").cloned().unwrap_or_default(),
            ts: map.get("ts").cloned().unwrap_or_default(),
            sender: map.get("from").cloned(),
            subject: map.get("subject").cloned(),
            snippet: map.get("snippet").cloned(),
            text: map.get("text").cloned(),
            html: map.get("html").cloned(),
            headers: map.get("headers").cloned(),
            code: map.get("code").cloned(),
        }))
    }

    async fn mailbox_messages(&self, box_id: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn();
        Ok(conn.lrange(mbox_list_key(box_id), 0, -1).await?)
    }
}
