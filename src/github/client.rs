// github/client.rs - GitHub REST client with rate-limit budget and retries
// Purpose: Every API call goes through one critical section that checks the
//          shared RateLimitState, waits for the reset when the budget is
//          spent, performs the call and records the new budget

use crate::error::{ReconError, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rand::Rng;
use reqwest::header::{ACCEPT, AUTHORIZATION, RETRY_AFTER};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const JSON_ACCEPT: &str = "application/vnd.github+json";
pub const RAW_ACCEPT: &str = "application/vnd.github.raw";

const USER_AGENT: &str = "jsrecon-github/0.1";
const MIN_RATE_LIMIT_WAIT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Default)]
pub struct ApiResponse {
    pub status: u16,
    /// `X-RateLimit-Remaining`
    pub remaining: Option<u64>,
    /// `X-RateLimit-Reset`, epoch seconds.
    pub reset: Option<i64>,
    /// `Retry-After`, seconds.
    pub retry_after: Option<u64>,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 403/429 carrying an exhausted budget or a Retry-After.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self.status, 403 | 429) && (self.remaining == Some(0) || self.retry_after.is_some())
    }

    fn message(&self) -> String {
        let text = String::from_utf8_lossy(&self.body);
        serde_json::from_str::<serde_json::Value>(&text)
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
            .unwrap_or_else(|| text.chars().take(200).collect())
    }
}

#[async_trait]
pub trait GitHubTransport: Send + Sync {
    /// A single HTTP GET. Network failures are `Transient`; any HTTP status
    /// is returned as a response.
    async fn get(&self, url: &str, accept: &str, token: Option<&str>) -> Result<ApiResponse>;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ReconError::Configuration(format!("failed to build GitHub client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl GitHubTransport for ReqwestTransport {
    async fn get(&self, url: &str, accept: &str, token: Option<&str>) -> Result<ApiResponse> {
        let mut request = self.client.get(url).header(ACCEPT, accept);
        if let Some(token) = token {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        let resp = request.send().await?;

        let header = |name: &str| {
            resp.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let remaining = header("x-ratelimit-remaining").and_then(|v| v.parse().ok());
        let reset = header("x-ratelimit-reset").and_then(|v| v.parse().ok());
        let retry_after = header(RETRY_AFTER.as_str()).and_then(|v| v.parse().ok());
        let status = resp.status().as_u16();
        let body = resp.bytes().await?.to_vec();

        Ok(ApiResponse {
            status,
            remaining,
            reset,
            retry_after,
            body,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// RATE LIMIT STATE
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitState {
    pub remaining: Option<u64>,
    pub reset_at: Option<DateTime<Utc>>,
}

impl RateLimitState {
    /// How long to suspend before the next call, if the budget is spent.
    pub fn wait_needed(&self, now: DateTime<Utc>) -> Option<Duration> {
        if self.remaining != Some(0) {
            return None;
        }
        let wait = self
            .reset_at
            .and_then(|reset| (reset - now).to_std().ok())
            .unwrap_or_default();
        Some(wait.max(MIN_RATE_LIMIT_WAIT))
    }

    pub fn observe(&mut self, resp: &ApiResponse, now: DateTime<Utc>) {
        if let Some(remaining) = resp.remaining {
            self.remaining = Some(remaining);
        }
        if let Some(reset) = resp.reset.and_then(|s| Utc.timestamp_opt(s, 0).single()) {
            self.reset_at = Some(reset);
        }
        if resp.is_rate_limited() {
            self.remaining = Some(0);
            if let Some(secs) = resp.retry_after {
                self.reset_at = Some(now + chrono::Duration::seconds(secs as i64));
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// CLIENT
// ═══════════════════════════════════════════════════════════════════════════

pub struct GitHubClient {
    transport: Arc<dyn GitHubTransport>,
    token: Option<String>,
    api_base: String,
    state: Mutex<RateLimitState>,
    max_attempts: u32,
    backoff_base: Duration,
    cancel: CancellationToken,
}

impl GitHubClient {
    pub fn new(
        transport: Arc<dyn GitHubTransport>,
        token: Option<String>,
        api_base: &str,
        max_attempts: u32,
        backoff_base: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            transport,
            token: token.filter(|t| !t.trim().is_empty()),
            api_base: api_base.trim_end_matches('/').to_string(),
            state: Mutex::new(RateLimitState::default()),
            max_attempts: max_attempts.max(1),
            backoff_base,
            cancel,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    /// Absolute API URL for `path` (`/search/repositories?...`).
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    /// GET with rate-limit waits and bounded retries for transient failures.
    /// Non-rate-limit HTTP errors are returned as responses.
    pub async fn get(&self, url: &str, accept: &str) -> Result<ApiResponse> {
        let mut attempt = 0u32;
        loop {
            let result = {
                let mut state = self.state.lock().await;
                if let Some(wait) = state.wait_needed(Utc::now()) {
                    info!(wait_secs = wait.as_secs(), "GitHub rate limit exhausted, waiting for reset");
                    self.sleep(wait).await?;
                    *state = RateLimitState::default();
                }
                if self.cancel.is_cancelled() {
                    return Err(ReconError::Cancelled);
                }
                let result = self.transport.get(url, accept, self.token.as_deref()).await;
                if let Ok(resp) = &result {
                    state.observe(resp, Utc::now());
                }
                result
            };

            let err = match result {
                Ok(resp) if resp.is_rate_limited() => {
                    warn!(url, status = resp.status, "GitHub rate limit hit");
                    continue;
                }
                Ok(resp) if resp.status >= 500 => {
                    ReconError::Transient(format!("GitHub returned HTTP {}", resp.status))
                }
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_transient() => e,
                Err(e) => return Err(e),
            };

            attempt += 1;
            if attempt >= self.max_attempts {
                warn!(url, attempts = attempt, error = %err, "GitHub request failed");
                return Err(err);
            }
            let delay = self.backoff(attempt);
            debug!(url, attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying GitHub request");
            self.sleep(delay).await?;
        }
    }

    /// JSON GET. 404 is `None`; other non-success statuses are `Api` errors.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<Option<T>> {
        let resp = self.get(url, JSON_ACCEPT).await?;
        if resp.status == 404 {
            return Ok(None);
        }
        if !resp.is_success() {
            return Err(ReconError::Api {
                status: resp.status,
                message: resp.message(),
            });
        }
        Ok(Some(serde_json::from_slice(&resp.body)?))
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.backoff_base.saturating_mul(1u32 << (attempt - 1).min(10));
        let jitter_cap = (self.backoff_base.as_millis() as u64 / 2).max(1);
        exp + Duration::from_millis(rand::thread_rng().gen_range(0..jitter_cap))
    }

    async fn sleep(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(ReconError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockGitHubTransport;

    fn client(transport: Arc<MockGitHubTransport>, max_attempts: u32) -> GitHubClient {
        GitHubClient::new(
            transport,
            None,
            "https://api.github.test",
            max_attempts,
            Duration::from_secs(1),
            CancellationToken::new(),
        )
    }

    #[test]
    fn test_rate_limit_state_waits_only_when_exhausted() {
        let now = Utc::now();
        let mut state = RateLimitState::default();
        assert!(state.wait_needed(now).is_none());

        state.observe(
            &ApiResponse {
                status: 200,
                remaining: Some(0),
                reset: Some(now.timestamp() + 30),
                ..ApiResponse::default()
            },
            now,
        );
        let wait = state.wait_needed(now).unwrap();
        assert!(wait >= Duration::from_secs(29) && wait <= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_call_waits_for_reset_without_consuming_attempts() {
        let transport = Arc::new(
            MockGitHubTransport::new()
                .then_retry_after(60)
                .then_json(200, r#"{"ok":true}"#),
        );
        let client = client(Arc::clone(&transport), 1);

        let resp = client.get("https://api.github.test/x", JSON_ACCEPT).await.unwrap();
        assert_eq!(resp.status, 200);

        let times = transport.request_times();
        assert_eq!(times.len(), 2);
        assert!(times[1] - times[0] >= Duration::from_secs(59));
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_errors_retry_with_backoff() {
        let transport = Arc::new(
            MockGitHubTransport::new()
                .then_json(502, "{}")
                .then_json(503, "{}")
                .then_json(200, "{}"),
        );
        let client = client(Arc::clone(&transport), 3);
        assert_eq!(client.get("https://api.github.test/x", JSON_ACCEPT).await.unwrap().status, 200);

        let times = transport.request_times();
        assert!(times[1] - times[0] >= Duration::from_secs(1));
        assert!(times[2] - times[1] >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_are_bounded() {
        let transport = Arc::new(MockGitHubTransport::new().then_json(500, "{}").repeat_last());
        let client = client(Arc::clone(&transport), 3);

        let err = client.get("https://api.github.test/x", JSON_ACCEPT).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(transport.request_times().len(), 3);
    }

    #[tokio::test]
    async fn test_not_found_is_none() {
        let transport = Arc::new(MockGitHubTransport::new().then_json(404, r#"{"message":"Not Found"}"#));
        let client = client(transport, 3);
        let found: Option<serde_json::Value> = client.get_json("https://api.github.test/orgs/nobody").await.unwrap();
        assert!(found.is_none());
    }
}
