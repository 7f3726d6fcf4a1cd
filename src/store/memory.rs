//! In-memory [`ProgressStore`] for tests.
//!
//! Mirrors the Redis hash semantics field-for-field: transitions overwrite
//! the relevant fields while unrelated ones persist, counters are created on
//! first increment, and a missing job reads as `total = 0`. TTLs are
//! accepted and ignored (expiry is the real store's concern).

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{
    now_iso, ItemState, JobRecord, JobState, MessageRecord, ProgressStore, StoreError,
    TaskItemRecord,
};

#[derive(Default)]
struct JobEntry {
    total: u64,
    allocated: u64,
    done: u64,
    state: Option<JobState>,
    updated_at: String,
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<String, JobEntry>,
    items: HashMap<(String, u32), TaskItemRecord>,
    messages: HashMap<String, MessageRecord>,
    mailboxes: HashMap<String, Vec<String>>,
    wait_locks: HashSet<(String, u32)>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProgressStore for MemoryStore {
    async fn create_job(&self, job_id: &str, total: u64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.jobs.insert(
            job_id.to_string(),
            JobEntry {
                total,
                allocated: 0,
                done: 0,
                state: Some(JobState::InProgress),
                updated_at: now_iso(),
            },
        );
        Ok(())
    }

    async fn mark_item_allocated(
        &self,
        job_id: &str,
        item_id: u32,
        email: &str,
        box_id: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        let item = inner
            .items
            .entry((job_id.to_string(), item_id))
            .or_default();
        item.email = Some(email.to_string());
        item.box_id = Some(box_id.to_string());
        item.state = Some(ItemState::Allocated);
        item.updated_at = Some(now_iso());
        Ok(())
    }

    async fn mark_item_failed(
        &self,
        job_id: &str,
        item_id: u32,
        error: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        let item = inner
            .items
            .entry((job_id.to_string(), item_id))
            .or_default();
        item.state = Some(ItemState::Failed);
        item.error = Some(error.to_string());
        item.updated_at = Some(now_iso());
        Ok(())
    }

    async fn mark_item_received(
        &self,
        job_id: &str,
        item_id: u32,
        msg_id: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        let item = inner
            .items
            .entry((job_id.to_string(), item_id))
            .or_default();
        item.state = Some(ItemState::MessageReceived);
        item.msg_id = Some(msg_id.to_string());
        item.updated_at = Some(now_iso());
        Ok(())
    }

    async fn incr_allocated(&self, job_id: &str) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        let job = inner.jobs.entry(job_id.to_string()).or_default();
        job.allocated += 1;
        job.updated_at = now_iso();
        Ok(job.allocated)
    }

    async fn incr_done(&self, job_id: &str) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        let job = inner.jobs.entry(job_id.to_string()).or_default();
        job.done += 1;
        job.updated_at = now_iso();
        Ok(job.done)
    }

    async fn job_total(&self, job_id: &str) -> Result<u64, StoreError> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        Ok(inner.jobs.get(job_id).map(|j| j.total).unwrap_or(0))
    }

    async fn mark_job_completed(&self, job_id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        let job = inner.jobs.entry(job_id.to_string()).or_default();
        job.state = Some(JobState::Completed);
        job.updated_at = now_iso();
        Ok(())
    }

    async fn store_message(&self, msg: &MessageRecord, _ttl: Duration) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.messages.insert(msg.msg_id.clone(), msg.clone());
        inner
            .mailboxes
            .entry(msg.box_id.clone())
            .or_default()
            .push(msg.msg_id.clone());
        Ok(())
    }

    async fn set_wait_lock(
        &self,
        job_id: &str,
        item_id: u32,
        _ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.wait_locks.insert((job_id.to_string(), item_id));
        Ok(())
    }

    async fn wait_lock_exists(&self, job_id: &str, item_id: u32) -> Result<bool, StoreError> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        Ok(inner.wait_locks.contains(&(job_id.to_string(), item_id)))
    }

    async fn delete_wait_lock(&self, job_id: &str, item_id: u32) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.wait_locks.remove(&(job_id.to_string(), item_id));
        Ok(())
    }

    async fn job(&self, job_id: &str) -> Result<Option<JobRecord>, StoreError> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        Ok(inner.jobs.get(job_id).map(|j| JobRecord {
            total: j.total,
            allocated: j.allocated,
            done: j.done,
            state: j.state.unwrap_or(JobState::InProgress),
            updated_at: j.updated_at.clone(),
        }))
    }

    async fn task_item(
        &self,
        job_id: &str,
        item_id: u32,
    ) -> Result<Option<TaskItemRecord>, StoreError> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        Ok(inner.items.get(&(job_id.to_string(), item_id)).cloned())
    }

    async fn message(&self, msg_id: &str) -> Result<Option<MessageRecord>, StoreError> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        Ok(inner.messages.get(msg_id).cloned())
    }

    async fn mailbox_messages(&self, box_id: &str) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        Ok(inner.mailboxes.get(box_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counters_start_at_zero_and_increment() {
        let store = MemoryStore::new();
        store.create_job("j1", 3).await.unwrap();
        assert_eq!(store.incr_done("j1").await.unwrap(), 1);
        assert_eq!(store.incr_done("j1").await.unwrap(), 2);
        assert_eq!(store.incr_allocated("j1").await.unwrap(), 1);

        let job = store.job("j1").await.unwrap().unwrap();
        assert_eq!(job.done, 2);
        assert_eq!(job.allocated, 1);
        assert_eq!(job.total, 3);
        assert_eq!(job.state, JobState::InProgress);
    }

    #[tokio::test]
    async fn missing_job_reads_as_unseeded() {
        let store = MemoryStore::new();
        assert_eq!(store.job_total("nope").await.unwrap(), 0);
        assert!(store.job("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn incrementing_a_missing_job_creates_a_partial_record() {
        // Matches HINCRBY on a missing hash: the counter exists, total stays 0.
        let store = MemoryStore::new();
        assert_eq!(store.incr_done("j2").await.unwrap(), 1);
        let job = store.job("j2").await.unwrap().unwrap();
        assert_eq!(job.total, 0);
        assert_eq!(job.state, JobState::InProgress);
    }

    #[tokio::test]
    async fn failed_transition_keeps_allocation_fields() {
        let store = MemoryStore::new();
        store
            .mark_item_allocated("j1", 0, "a@b.c", "box-1")
            .await
            .unwrap();
        store.mark_item_failed("j1", 0, "wait timed out").await.unwrap();

        let item = store.task_item("j1", 0).await.unwrap().unwrap();
        assert_eq!(item.state, Some(ItemState::Failed));
        assert_eq!(item.email.as_deref(), Some("a@b.c"));
        assert_eq!(item.box_id.as_deref(), Some("box-1"));
        assert_eq!(item.error.as_deref(), Some("wait timed out"));
    }

    #[tokio::test]
    async fn messages_land_in_exactly_one_mailbox_list() {
        let store = MemoryStore::new();
        let msg = MessageRecord {
            msg_id: "msg:1".into(),
            box_id: "box-1".into(),
            ts: now_iso(),
            sender: None,
            subject: None,
            snippet: None,
            text: None,
            html: None,
            headers: None,
            code: Some("42".into()),
        };
        store
            .store_message(&msg, Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(store.mailbox_messages("box-1").await.unwrap(), vec!["msg:1"]);
        assert!(store.mailbox_messages("box-2").await.unwrap().is_empty());
        assert!(store.message("msg:1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn wait_locks_set_and_delete() {
        let store = MemoryStore::new();
        store
            .set_wait_lock("j1", 4, Duration::from_secs(120))
            .await
            .unwrap();
        assert!(store.wait_lock_exists("j1", 4).await.unwrap());
        store.delete_wait_lock("j1", 4).await.unwrap();
        assert!(!store.wait_lock_exists("j1", 4).await.unwrap());
        // Deleting an absent lock is a no-op, same as DEL.
        store.delete_wait_lock("j1", 4).await.unwrap();
    }
}
