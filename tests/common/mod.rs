//! Shared test scaffolding: a stub mail API on an ephemeral port plus
//! worker-context builders with test-friendly timings.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use mailboxd::config::WorkerConfig;
use mailboxd::mail::MailClient;
use mailboxd::store::ProgressStore;
use mailboxd::WorkerContext;

// ─── Stub mail API ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum AllocateMode {
    /// `{email, id}` per hit, after the configured number of 500s.
    Normal,
    /// 2xx with a payload missing the required fields.
    MissingFields,
}

#[derive(Debug, Clone)]
pub enum CodeMode {
    Success { code: String, html: String },
    Waiting,
    RemoteError { message: String },
}

pub struct MailStub {
    pub allocate_hits: AtomicU32,
    pub code_hits: AtomicU32,
    /// Respond 500 to this many allocate calls before succeeding.
    pub allocate_failures: AtomicU32,
    /// Respond 500 to this many code polls before applying `code_mode`.
    pub code_failures: AtomicU32,
    pub allocate_mode: Mutex<AllocateMode>,
    pub code_mode: Mutex<CodeMode>,
    /// Per-request allocate delay, to make concurrency observable.
    pub allocate_delay: Duration,
    inflight: AtomicU32,
    pub max_inflight: AtomicU32,
}

impl MailStub {
    fn new(allocate_delay: Duration) -> Self {
        Self {
            allocate_hits: AtomicU32::new(0),
            code_hits: AtomicU32::new(0),
            allocate_failures: AtomicU32::new(0),
            code_failures: AtomicU32::new(0),
            allocate_mode: Mutex::new(AllocateMode::Normal),
            code_mode: Mutex::new(CodeMode::Waiting),
            allocate_delay,
            inflight: AtomicU32::new(0),
            max_inflight: AtomicU32::new(0),
        }
    }

    pub fn set_code_mode(&self, mode: CodeMode) {
        *self.code_mode.lock().unwrap() = mode;
    }

    pub fn set_allocate_mode(&self, mode: AllocateMode) {
        *self.allocate_mode.lock().unwrap() = mode;
    }
}

async fn allocate_handler(
    State(stub): State<Arc<MailStub>>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let current = stub.inflight.fetch_add(1, Ordering::SeqCst) + 1;
    stub.max_inflight.fetch_max(current, Ordering::SeqCst);
    if !stub.allocate_delay.is_zero() {
        tokio::time::sleep(stub.allocate_delay).await;
    }
    stub.inflight.fetch_sub(1, Ordering::SeqCst);

    let n = stub.allocate_hits.fetch_add(1, Ordering::SeqCst) + 1;
    let remaining_failures = stub.allocate_failures.load(Ordering::SeqCst);
    if n <= remaining_failures {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"detail": "allocation backend unavailable"})),
        );
    }

    match stub.allocate_mode.lock().unwrap().clone() {
        AllocateMode::Normal => {
            let domain = params
                .get("domain")
                .cloned()
                .unwrap_or_else(|| "example.test".to_string());
            (
                StatusCode::OK,
                Json(json!({"email": format!("user{n}@{domain}"), "id": format!("box-{n}")})),
            )
        }
        AllocateMode::MissingFields => (StatusCode::OK, Json(json!({"unexpected": true}))),
    }
}

async fn code_handler(State(stub): State<Arc<MailStub>>) -> impl IntoResponse {
    let n = stub.code_hits.fetch_add(1, Ordering::SeqCst) + 1;
    if n <= stub.code_failures.load(Ordering::SeqCst) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"detail": "flaky"})),
        );
    }

    match stub.code_mode.lock().unwrap().clone() {
        CodeMode::Success { code, html } => (
            StatusCode::OK,
            Json(json!({"status": "success", "value": code, "message": html})),
        ),
        CodeMode::Waiting => (StatusCode::OK, Json(json!({"status": "waiting"}))),
        CodeMode::RemoteError { message } => (
            StatusCode::OK,
            Json(json!({"status": "error", "message": message})),
        ),
    }
}

/// Start the stub on an ephemeral port; returns the handle and the base URL.
pub async fn spawn_mail_stub(allocate_delay: Duration) -> (Arc<MailStub>, String) {
    let stub = Arc::new(MailStub::new(allocate_delay));

    let app = Router::new()
        .route("/v1/email/allocate", post(allocate_handler))
        .route("/v1/email/{box_id}/code", get(code_handler))
        .with_state(Arc::clone(&stub));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind stub listener");
    let addr = listener.local_addr().expect("stub local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("stub server");
    });

    (stub, format!("http://{addr}"))
}

// ─── Worker builders ─────────────────────────────────────────────────────────

/// Worker config pointed at the stub, with timings scaled for tests.
pub fn test_config(base_url: &str) -> WorkerConfig {
    let mut cfg = WorkerConfig::default();
    cfg.set_api_base_url(base_url);
    cfg.allocate_timeout = Duration::from_secs(2);
    cfg.poll_request_timeout = Duration::from_secs(2);
    cfg.wait_timeout = Duration::from_millis(300);
    cfg.poll_interval = Duration::from_millis(25);
    cfg.chunk_pause = Duration::ZERO;
    cfg.allocate_retry_delay = Duration::from_millis(5);
    cfg
}

pub fn test_ctx(config: WorkerConfig, store: Arc<dyn ProgressStore>) -> Arc<WorkerContext> {
    let config = Arc::new(config);
    let mail = Arc::new(MailClient::new(&config).expect("build mail client"));
    Arc::new(WorkerContext::new(config, store, mail))
}
