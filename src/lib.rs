// SPDX-License-Identifier: MIT
//! mailboxd — bulk disposable-mailbox allocation worker.
//!
//! Provisions disposable mailboxes in batches and waits for verification
//! codes to arrive, tracking per-item and per-job progress in a shared
//! key-value store. Invoked through task messages on a Redis list; exposes
//! nothing but the store's contents.

pub mod backoff;
pub mod config;
pub mod mail;
pub mod queue;
pub mod store;
pub mod tasks;

use std::sync::Arc;

use tokio::sync::Semaphore;

use config::WorkerConfig;
use mail::MailClient;
use store::ProgressStore;

/// Shared state passed to every task invocation.
///
/// The store handle is an explicit dependency, acquired once per process and
/// injected down the call chain — never looked up from ambient context.
pub struct WorkerContext {
    pub config: Arc<WorkerConfig>,
    pub store: Arc<dyn ProgressStore>,
    pub mail: Arc<MailClient>,
    /// Bounds concurrent allocation calls across all jobs in this process.
    /// Each worker process enforces its own cap; there is no cross-process
    /// limit.
    pub allocate_permits: Arc<Semaphore>,
}

impl WorkerContext {
    pub fn new(
        config: Arc<WorkerConfig>,
        store: Arc<dyn ProgressStore>,
        mail: Arc<MailClient>,
    ) -> Self {
        Self {
            config,
            store,
            mail,
            allocate_permits: Arc::new(Semaphore::new(tasks::batch::MAX_CONCURRENT_ALLOCATIONS)),
        }
    }
}
