// SPDX-License-Identifier: MIT
//! mailboxd binary: parse flags/environment, connect the store, consume the
//! task queue until interrupted.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::Parser;
use tracing::info;

use mailboxd::config::WorkerConfig;
use mailboxd::mail::MailClient;
use mailboxd::queue;
use mailboxd::store::RedisStore;
use mailboxd::WorkerContext;

#[derive(Parser)]
#[command(
    name = "mailboxd",
    about = "Bulk disposable-mailbox allocation worker",
    version
)]
struct Args {
    /// Mail API base URL
    #[arg(long, env = "API_BASE")]
    api_base: Option<String>,

    /// API key sent with every mail API request
    #[arg(long, env = "EMAIL_API_KEY")]
    api_key: Option<String>,

    /// Header name the API key is sent under
    #[arg(long, env = "EMAIL_API_KEY_HEADER")]
    api_key_header: Option<String>,

    /// Verify the mail API's TLS certificate
    #[arg(long, env = "EMAIL_API_VERIFY_TLS")]
    verify_tls: Option<bool>,

    /// HTTP timeout for one allocation request (seconds)
    #[arg(long, env = "EMAIL_API_ALLOCATE_TIMEOUT")]
    allocate_timeout: Option<u64>,

    /// HTTP timeout ceiling for one code poll (seconds)
    #[arg(long, env = "EMAIL_API_MESSAGES_TIMEOUT")]
    poll_request_timeout: Option<u64>,

    /// Overall wall-clock budget for one wait-for-code attempt (seconds)
    #[arg(long, env = "MAIL_WAIT_TIMEOUT_SEC")]
    wait_timeout: Option<u64>,

    /// Pause between "not yet" code polls (seconds, fractional allowed)
    #[arg(long, env = "POLL_INTERVAL_SEC")]
    poll_interval: Option<f64>,

    /// TTL for stored messages and mailbox lists (seconds)
    #[arg(long, env = "MESSAGE_TTL_SEC")]
    message_ttl: Option<u64>,

    /// Pause between allocation chunks (seconds, fractional allowed)
    #[arg(long, env = "ALLOCATE_PAUSE_SEC")]
    chunk_pause: Option<f64>,

    /// Redis list holding task messages
    #[arg(long, env = "TASK_QUEUE")]
    queue: Option<String>,

    #[arg(long, env = "REDIS_HOST")]
    redis_host: Option<String>,

    #[arg(long, env = "REDIS_PORT")]
    redis_port: Option<u16>,

    #[arg(long, env = "REDIS_USER")]
    redis_user: Option<String>,

    #[arg(long, env = "REDIS_PASS")]
    redis_pass: Option<String>,

    /// Connect to Redis with TLS
    #[arg(long, env = "REDIS_SSL")]
    redis_ssl: Option<bool>,

    #[arg(long, env = "REDIS_DB")]
    redis_db: Option<i64>,

    /// Log filter (trace, debug, info, warn, error)
    #[arg(long, env = "MAILBOXD_LOG")]
    log: Option<String>,
}

impl Args {
    fn into_config(self) -> WorkerConfig {
        let mut cfg = WorkerConfig::default();
        if let Some(base) = &self.api_base {
            cfg.set_api_base_url(base);
        }
        if let Some(v) = self.api_key {
            cfg.api_key = Some(v);
        }
        if let Some(v) = self.api_key_header {
            cfg.api_key_header = v;
        }
        if let Some(v) = self.verify_tls {
            cfg.verify_tls = v;
        }
        if let Some(v) = self.allocate_timeout {
            cfg.allocate_timeout = Duration::from_secs(v);
        }
        if let Some(v) = self.poll_request_timeout {
            cfg.poll_request_timeout = Duration::from_secs(v);
        }
        if let Some(v) = self.wait_timeout {
            cfg.wait_timeout = Duration::from_secs(v);
        }
        if let Some(v) = self.poll_interval {
            cfg.poll_interval = Duration::from_secs_f64(v.max(0.0));
        }
        if let Some(v) = self.message_ttl {
            cfg.message_ttl = Duration::from_secs(v);
        }
        if let Some(v) = self.chunk_pause {
            cfg.chunk_pause = Duration::from_secs_f64(v.max(0.0));
        }
        if let Some(v) = self.queue {
            cfg.queue_name = v;
        }
        if let Some(v) = self.redis_host {
            cfg.redis.host = v;
        }
        if let Some(v) = self.redis_port {
            cfg.redis.port = v;
        }
        cfg.redis.username = self.redis_user.or(cfg.redis.username);
        cfg.redis.password = self.redis_pass.or(cfg.redis.password);
        if let Some(v) = self.redis_ssl {
            cfg.redis.tls = v;
        }
        if let Some(v) = self.redis_db {
            cfg.redis.db = v;
        }
        cfg
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let log_filter = args.log.clone().unwrap_or_else(|| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(log_filter)
        .compact()
        .init();

    let config = Arc::new(args.into_config());
    info!(
        api_base = %config.api_base_url,
        queue = %config.queue_name,
        redis = %format!("{}:{}/{}", config.redis.host, config.redis.port, config.redis.db),
        "mailboxd starting"
    );

    let client =
        redis::Client::open(config.redis.url()).context("opening redis client")?;
    let conn = client
        .get_connection_manager()
        .await
        .context("connecting to redis")?;

    let store = Arc::new(RedisStore::new(conn.clone()));
    let mail = Arc::new(MailClient::new(&config).context("building mail API client")?);
    let ctx = Arc::new(WorkerContext::new(config, store, mail));

    tokio::select! {
        result = queue::run_consumer(ctx, conn) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received — shutting down");
            Ok(())
        }
    }
}
