// SPDX-License-Identifier: MIT
//! Mail API client — mailbox allocation and code polling.
//!
//! Wraps the two external HTTP operations with timeout semantics local to
//! each call. Allocation does no retrying of its own (the batch allocator
//! owns that policy); the code poll loop retries transport errors internally
//! because they are part of the polling protocol itself.

pub mod html;

use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::backoff::BackoffPolicy;
use crate::config::WorkerConfig;
use crate::store::{now_iso, MessageRecord};

/// Floor for a single poll's HTTP timeout, even when the remaining wait
/// budget is nearly exhausted.
const MIN_POLL_REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

/// Base delay for the escalating transport-error backoff inside the poll
/// loop (capped at the configured poll interval).
const TRANSPORT_BACKOFF_BASE: Duration = Duration::from_secs(1);

// ─── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum MailApiError {
    /// Network failure, HTTP-level timeout, non-2xx status, or an
    /// undecodable body. Retryable.
    #[error("mail API transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The API explicitly reported an error status for this mailbox.
    /// Not retryable.
    #[error("mail API returned error for box {box_id}: {message}")]
    Remote { box_id: String, message: String },

    /// 2xx response whose payload lacks the fields we need.
    #[error("bad allocate response: {0}")]
    BadResponse(String),

    /// The overall wait deadline elapsed without a message.
    #[error("box {box_id} did not receive a message after {timeout_secs}s (attempts: {attempts})")]
    CodeWaitTimeout {
        box_id: String,
        timeout_secs: u64,
        attempts: u32,
    },
}

/// One successfully allocated mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub email: String,
    pub box_id: String,
}

// ─── Wire types ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CodeResponse {
    status: Option<String>,
    /// The verification code on `status == "success"`.
    value: Option<String>,
    /// HTML body on success; error detail on `status == "error"`.
    message: Option<String>,
}

enum PollOutcome {
    Ready { code: String, html_body: String },
    RemoteError(String),
    NotYet(String),
}

// ─── Client ──────────────────────────────────────────────────────────────────

pub struct MailClient {
    http: reqwest::Client,
    base_url: String,
    allocate_timeout: Duration,
    poll_request_timeout: Duration,
    poll_interval: Duration,
    transport_backoff: BackoffPolicy,
}

impl MailClient {
    pub fn new(config: &WorkerConfig) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(key) = &config.api_key {
            headers.insert(
                HeaderName::from_bytes(config.api_key_header.as_bytes())?,
                HeaderValue::from_str(key)?,
            );
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()?;

        Ok(Self {
            http,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            allocate_timeout: config.allocate_timeout,
            poll_request_timeout: config.poll_request_timeout,
            poll_interval: config.poll_interval,
            transport_backoff: BackoffPolicy::escalating(
                TRANSPORT_BACKOFF_BASE,
                config.poll_interval,
            ),
        })
    }

    /// Allocate one mailbox. One request, one timeout, no retries here.
    pub async fn allocate(&self, site: &str, domain: &str) -> Result<Allocation, MailApiError> {
        let url = format!("{}/v1/email/allocate", self.base_url);
        let resp = self
            .http
            .post(&url)
            .query(&[("site", site), ("domain", domain)])
            .timeout(self.allocate_timeout)
            .send()
            .await?
            .error_for_status()?;

        // Tolerant parse: some deployments return `id`, others `box_id`,
        // and ids may arrive as JSON numbers.
        let body: serde_json::Value = resp.json().await?;
        let email = scalar_field(&body, "email");
        let box_id = scalar_field(&body, "id").or_else(|| scalar_field(&body, "box_id"));
        match (email, box_id) {
            (Some(email), Some(box_id)) => Ok(Allocation { email, box_id }),
            _ => Err(MailApiError::BadResponse(body.to_string())),
        }
    }

    /// Poll for a verification code until `timeout` elapses (wall clock from
    /// entry). Each poll's HTTP timeout is the configured per-poll ceiling
    /// clamped to the remaining budget. The deadline is cooperative: a poll
    /// already in flight is never interrupted, only the next one is skipped.
    pub async fn wait_for_code(
        &self,
        box_id: &str,
        timeout: Duration,
    ) -> Result<MessageRecord, MailApiError> {
        let url = format!("{}/v1/email/{}/code", self.base_url, box_id);
        let start = Instant::now();
        let mut attempts: u32 = 0;
        let mut transport_failures: u32 = 0;

        while start.elapsed() < timeout {
            let remaining = timeout.saturating_sub(start.elapsed());
            let request_timeout = self
                .poll_request_timeout
                .min(remaining)
                .max(MIN_POLL_REQUEST_TIMEOUT);
            attempts += 1;

            match self.poll_once(&url, request_timeout).await {
                Ok(PollOutcome::Ready { code, html_body }) => {
                    debug!(box_id, attempts, "code arrived");
                    return Ok(build_message(box_id, &code, &html_body));
                }
                Ok(PollOutcome::RemoteError(message)) => {
                    // API-reported errors are final; only transport errors retry.
                    return Err(MailApiError::Remote {
                        box_id: box_id.to_string(),
                        message,
                    });
                }
                Ok(PollOutcome::NotYet(status)) => {
                    transport_failures = 0;
                    debug!(box_id, attempt = attempts, status, "message not ready yet");
                    self.pause(self.poll_interval, start, timeout).await;
                }
                Err(err) => {
                    transport_failures += 1;
                    warn!(
                        box_id,
                        attempt = attempts,
                        err = %err,
                        "code poll failed — retrying"
                    );
                    let delay = self.transport_backoff.delay_for(transport_failures);
                    self.pause(delay, start, timeout).await;
                }
            }
        }

        Err(MailApiError::CodeWaitTimeout {
            box_id: box_id.to_string(),
            timeout_secs: timeout.as_secs(),
            attempts,
        })
    }

    async fn poll_once(
        &self,
        url: &str,
        request_timeout: Duration,
    ) -> Result<PollOutcome, reqwest::Error> {
        let resp = self
            .http
            .get(url)
            .timeout(request_timeout)
            .send()
            .await?
            .error_for_status()?;
        let body: CodeResponse = resp.json().await?;

        let status = body.status.unwrap_or_default().to_lowercase();
        Ok(match status.as_str() {
            "success" => PollOutcome::Ready {
                code: body.value.unwrap_or_default(),
                html_body: body.message.unwrap_or_default(),
            },
            "error" => PollOutcome::RemoteError(
                body.message.unwrap_or_else(|| "unknown".to_string()),
            ),
            other => PollOutcome::NotYet(other.to_string()),
        })
    }

    /// Sleep `delay`, clamped so we never sleep past the overall deadline.
    async fn pause(&self, delay: Duration, start: Instant, timeout: Duration) {
        let remaining = timeout.saturating_sub(start.elapsed());
        let delay = delay.min(remaining);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

/// Accept strings and numbers; reject null/missing/structured values.
fn scalar_field(body: &serde_json::Value, field: &str) -> Option<String> {
    match body.get(field) {
        Some(serde_json::Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

/// Synthetic message id: not derived from any provider id.
fn synthetic_msg_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("msg:{}", &hex[..20])
}

fn build_message(box_id: &str, code: &str, html_body: &str) -> MessageRecord {
    let text = if html_body.is_empty() {
        String::new()
    } else {
        html::html_to_text(html_body)
    };
    let snippet = html::snippet(&text, html_body);

    MessageRecord {
        msg_id: synthetic_msg_id(),
        box_id: box_id.to_string(),
        ts: now_iso(),
        sender: None,
        subject: None,
        snippet: none_if_empty(snippet),
        text: none_if_empty(text),
        html: none_if_empty(html_body.to_string()),
        headers: None,
        code: none_if_empty(code.to_string()),
    }
}

fn none_if_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msg_ids_are_prefixed_and_unique() {
        let a = synthetic_msg_id();
        let b = synthetic_msg_id();
        assert!(a.starts_with("msg:"));
        assert_eq!(a.len(), "msg:".len() + 20);
        assert_ne!(a, b);
    }

    #[test]
    fn build_message_omits_absent_fields() {
        let msg = build_message("box-1", "", "");
        assert!(msg.code.is_none());
        assert!(msg.html.is_none());
        assert!(msg.text.is_none());
        assert!(msg.snippet.is_none());
        assert_eq!(msg.box_id, "box-1");
    }

    #[test]
    fn build_message_extracts_text_and_snippet() {
        let msg = build_message("box-1", "123456", "<p>Your code is <b>123456</b></p>");
        assert_eq!(msg.code.as_deref(), Some("123456"));
        assert_eq!(msg.text.as_deref(), Some("Your code is 123456"));
        assert_eq!(msg.snippet.as_deref(), Some("Your code is 123456"));
        assert!(msg.html.as_deref().unwrap().starts_with("<p>"));
    }

    #[test]
    fn scalar_fields_accept_numbers_and_reject_null() {
        let body = serde_json::json!({"email": "a@b.c", "id": 42, "missing": null});
        assert_eq!(scalar_field(&body, "email").as_deref(), Some("a@b.c"));
        assert_eq!(scalar_field(&body, "id").as_deref(), Some("42"));
        assert_eq!(scalar_field(&body, "missing"), None);
        assert_eq!(scalar_field(&body, "absent"), None);
    }
}
