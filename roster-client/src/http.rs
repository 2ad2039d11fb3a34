//! reqwest-backed [`UserApi`].
//!
//! Owns the retry and timeout policy the cache delegates to it: every call
//! gets `options.timeout`, and retryable failures are retried up to
//! `options.retries` times with exponential backoff.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CACHE_CONTROL};
use roster_cache::{RequestOptions, UserApi};
use roster_core::{FetchError, RosterResult};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

/// Longest error body kept in a [`FetchError::Status`] message.
const MAX_ERROR_BODY: usize = 512;

/// Upper bound on a single backoff sleep.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct HttpUserApi {
    client: reqwest::Client,
    base_url: String,
    headers: HeaderMap,
    retry_backoff: Duration,
}

impl HttpUserApi {
    pub fn new(config: &ClientConfig) -> ClientResult<Self> {
        Self::with_parts(
            &config.api_base_url,
            &config.auth_token,
            &config.session_id,
            Duration::from_millis(config.retry_backoff_ms),
        )
    }

    pub fn with_parts(
        base_url: &str,
        auth_token: &str,
        session_id: &str,
        retry_backoff: Duration,
    ) -> ClientResult<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            headers: build_headers(auth_token, session_id)?,
            retry_backoff,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_once(&self, path: &str, options: &RequestOptions) -> Result<Value, FetchError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self
            .client
            .get(url)
            .headers(self.headers.clone())
            .timeout(options.timeout);
        if options.no_cache {
            request = request.header(CACHE_CONTROL, "no-cache");
        }
        if !options.params.is_empty() {
            request = request.query(&options.params);
        }

        let response = request
            .send()
            .await
            .map_err(|err| map_reqwest_error(path, options.timeout, err))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                path: path.to_string(),
                status: status.as_u16(),
                message: truncate(&body, MAX_ERROR_BODY),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|err| map_reqwest_error(path, options.timeout, err))
    }
}

#[async_trait]
impl UserApi for HttpUserApi {
    async fn get(&self, path: &str, options: &RequestOptions) -> RosterResult<Value> {
        let mut attempt = 0;
        loop {
            match self.get_once(path, options).await {
                Ok(value) => {
                    debug!(path, attempt, "User API request succeeded");
                    return Ok(value);
                }
                Err(err) if err.is_retryable() && attempt < options.retries => {
                    attempt += 1;
                    let delay = backoff_delay(self.retry_backoff, attempt);
                    warn!(path, attempt, delay_ms = delay.as_millis() as u64, error = %err, "Retrying user API request");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

fn build_headers(auth_token: &str, session_id: &str) -> ClientResult<HeaderMap> {
    let mut headers = HeaderMap::new();
    let bearer = format!("Bearer {}", auth_token);
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&bearer).map_err(|e| ClientError::InvalidHeader {
            name: "authorization",
            reason: e.to_string(),
        })?,
    );
    headers.insert(
        HeaderName::from_static("x-session-id"),
        HeaderValue::from_str(session_id).map_err(|e| ClientError::InvalidHeader {
            name: "x-session-id",
            reason: e.to_string(),
        })?,
    );
    Ok(headers)
}

fn map_reqwest_error(path: &str, timeout: Duration, err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout {
            path: path.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }
    } else if err.is_decode() {
        FetchError::InvalidResponse {
            path: path.to_string(),
            reason: err.to_string(),
        }
    } else {
        FetchError::Transport {
            path: path.to_string(),
            reason: err.to_string(),
        }
    }
}

/// `base * 2^(attempt - 1)`, capped.
pub(crate) fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor).min(MAX_BACKOFF)
}

fn truncate(body: &str, max: usize) -> String {
    match body.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
