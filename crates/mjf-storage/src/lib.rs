//! HTTP fetch utilities with bounded retry + the SQLite offer store.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use mjf_core::FetchAttempt;
use reqwest::StatusCode;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info_span, warn, Instrument};

pub mod db;

pub use db::{OfferStore, StoreCounts, StoreError, UpsertBatch, UpsertOutcome};

pub const CRATE_NAME: &str = "mjf-storage";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

/// 429 and the gateway/server errors are worth another attempt; everything else is final.
pub fn classify_status(status: StatusCode) -> RetryDisposition {
    match status.as_u16() {
        429 | 500 | 502 | 503 | 504 => RetryDisposition::Retryable,
        _ => RetryDisposition::NonRetryable,
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    /// Policy where the n-th retry waits `factor * 2^n` seconds (n starting at 1).
    pub fn from_factor(max_retries: usize, factor_secs: f64) -> Self {
        let factor = if factor_secs.is_finite() && factor_secs > 0.0 {
            factor_secs
        } else {
            0.0
        };
        Self {
            max_retries,
            base_delay: Duration::from_secs_f64(factor * 2.0),
            ..Default::default()
        }
    }

    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }

    pub fn max_attempts(&self) -> usize {
        self.max_retries + 1
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            user_agent: None,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Sink for the append-only fetch audit log. Recording never fails the fetch.
#[async_trait]
pub trait FetchAudit: Send + Sync {
    async fn record(&self, attempt: FetchAttempt);
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{url} still failing after {attempts} attempts: {reason}")]
    Transient {
        url: String,
        attempts: usize,
        status: Option<u16>,
        reason: String,
    },
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },
    #[error("invalid payload from {url}: {reason}")]
    InvalidPayload { url: String, reason: String },
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Transient { status, .. } => *status,
            FetchError::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub struct HttpFetcher {
    client: reqwest::Client,
    backoff: BackoffPolicy,
    audit: Option<Arc<dyn FetchAudit>>,
}

impl std::fmt::Debug for HttpFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpFetcher")
            .field("backoff", &self.backoff)
            .field("audited", &self.audit.is_some())
            .finish()
    }
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            backoff: config.backoff,
            audit: None,
        })
    }

    pub fn with_audit(mut self, audit: Arc<dyn FetchAudit>) -> Self {
        self.audit = Some(audit);
        self
    }

    async fn audit(&self, url: &str, status: Option<StatusCode>, size: Option<usize>, error: Option<String>) {
        if let Some(audit) = &self.audit {
            audit
                .record(FetchAttempt {
                    timestamp: Utc::now(),
                    endpoint: url.to_string(),
                    status_code: status.map(|s| s.as_u16()),
                    response_size: size,
                    error,
                })
                .await;
        }
    }

    /// GET `url` and decode the body as JSON, retrying transient failures.
    ///
    /// Each attempt is written to the audit sink, including a body that fails to
    /// decode. A retryable failure on the last attempt surfaces as [`FetchError::Transient`].
    pub async fn fetch_json(&self, source_id: &str, url: &str) -> Result<JsonValue, FetchError> {
        self.fetch_decoded(source_id, url, |body| {
            serde_json::from_slice(body).map_err(|e| format!("json decode: {e}"))
        })
        .await
    }

    pub async fn fetch_text(&self, source_id: &str, url: &str) -> Result<String, FetchError> {
        self.fetch_decoded(source_id, url, |body| {
            String::from_utf8(body.to_vec()).map_err(|e| format!("body is not utf-8: {e}"))
        })
        .await
    }

    async fn fetch_decoded<T, F>(&self, source_id: &str, url: &str, decode: F) -> Result<T, FetchError>
    where
        T: Send,
        F: Fn(&[u8]) -> Result<T, String> + Send + Sync,
    {
        let span = info_span!("http_fetch", source_id, url);
        self.fetch_with_retry(url, &decode).instrument(span).await
    }

    async fn fetch_with_retry<T, F>(&self, url: &str, decode: &F) -> Result<T, FetchError>
    where
        T: Send,
        F: Fn(&[u8]) -> Result<T, String> + Send + Sync,
    {
        let max_attempts = self.backoff.max_attempts();

        for attempt in 0..max_attempts {
            let is_last = attempt + 1 == max_attempts;
            debug!(attempt = attempt + 1, max_attempts, "sending request");

            let (failure, status) = match self.client.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();
                    match resp.bytes().await {
                        Ok(body) if status.is_success() => {
                            let decoded = decode(&body);
                            let error = decoded.as_ref().err().cloned();
                            self.audit(url, Some(status), Some(body.len()), error).await;
                            // a bad body is not retried
                            return decoded.map_err(|reason| FetchError::InvalidPayload {
                                url: final_url,
                                reason,
                            });
                        }
                        Ok(body) => {
                            self.audit(
                                url,
                                Some(status),
                                Some(body.len()),
                                Some(format!("http status {}", status.as_u16())),
                            )
                            .await;
                            if classify_status(status) == RetryDisposition::NonRetryable {
                                return Err(FetchError::HttpStatus {
                                    status: status.as_u16(),
                                    url: final_url,
                                });
                            }
                            (format!("http status {}", status.as_u16()), Some(status.as_u16()))
                        }
                        Err(err) => {
                            self.audit(url, Some(status), None, Some(err.to_string())).await;
                            if classify_reqwest_error(&err) == RetryDisposition::NonRetryable {
                                return Err(FetchError::Request {
                                    url: url.to_string(),
                                    reason: err.to_string(),
                                });
                            }
                            (err.to_string(), Some(status.as_u16()))
                        }
                    }
                }
                Err(err) => {
                    self.audit(url, None, None, Some(err.to_string())).await;
                    if classify_reqwest_error(&err) == RetryDisposition::NonRetryable {
                        return Err(FetchError::Request {
                            url: url.to_string(),
                            reason: err.to_string(),
                        });
                    }
                    (err.to_string(), None)
                }
            };

            if is_last {
                return Err(FetchError::Transient {
                    url: url.to_string(),
                    attempts: max_attempts,
                    status,
                    reason: failure,
                });
            }

            let delay = self.backoff.delay_for_attempt(attempt);
            warn!(
                attempt = attempt + 1,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                reason = %failure,
                "transient fetch failure, backing off"
            );
            tokio::time::sleep(delay).await;
        }

        Err(FetchError::Transient {
            url: url.to_string(),
            attempts: max_attempts,
            status: None,
            reason: "no attempt was made".into(),
        })
    }
}
