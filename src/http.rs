// http.rs - HTTP probing and fetching
// Purpose: Liveness probes, HEAD fingerprinting and body downloads behind a
//          trait so stages can run against a mock in tests

use crate::error::{ReconError, Result};
use crate::model::CacheHeaders;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, CONTENT_LENGTH, ETAG, LAST_MODIFIED};
use reqwest::Client;
use std::time::Duration;

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) jsrecon/0.1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResponse {
    pub status: u16,
    pub headers: CacheHeaders,
}

impl ProbeResponse {
    /// 2xx and 3xx count as live.
    pub fn is_live(&self) -> bool {
        (200..400).contains(&self.status)
    }
}

#[derive(Debug, Clone)]
pub struct FetchedBody {
    pub status: u16,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait HttpProbe: Send + Sync {
    /// GET without reading the body.
    async fn probe(&self, url: &str) -> Result<ProbeResponse>;

    async fn head(&self, url: &str) -> Result<ProbeResponse>;

    async fn fetch(&self, url: &str) -> Result<FetchedBody>;
}

// ═══════════════════════════════════════════════════════════════════════════
// REQWEST IMPLEMENTATION
// ═══════════════════════════════════════════════════════════════════════════

pub struct ReqwestProbe {
    client: Client,
}

impl ReqwestProbe {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .redirect(reqwest::redirect::Policy::limited(10))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ReconError::Configuration(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpProbe for ReqwestProbe {
    async fn probe(&self, url: &str) -> Result<ProbeResponse> {
        let resp = self.client.get(url).send().await?;
        Ok(ProbeResponse {
            status: resp.status().as_u16(),
            headers: cache_headers(resp.headers()),
        })
    }

    async fn head(&self, url: &str) -> Result<ProbeResponse> {
        let resp = self.client.head(url).send().await?;
        Ok(ProbeResponse {
            status: resp.status().as_u16(),
            headers: cache_headers(resp.headers()),
        })
    }

    async fn fetch(&self, url: &str) -> Result<FetchedBody> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status().as_u16();
        let bytes = resp.bytes().await?.to_vec();
        Ok(FetchedBody { status, bytes })
    }
}

pub fn cache_headers(headers: &HeaderMap) -> CacheHeaders {
    let text = |name: HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    CacheHeaders {
        etag: text(ETAG),
        content_length: text(CONTENT_LENGTH).and_then(|v| v.trim().parse().ok()),
        last_modified: text(LAST_MODIFIED),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_cache_headers_extraction() {
        let mut headers = HeaderMap::new();
        headers.insert(ETAG, HeaderValue::from_static("\"abc123\""));
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("2048"));

        let extracted = cache_headers(&headers);
        assert_eq!(extracted.etag.as_deref(), Some("\"abc123\""));
        assert_eq!(extracted.content_length, Some(2048));
        assert_eq!(extracted.last_modified, None);
    }

    #[test]
    fn test_liveness_range() {
        let resp = |status| ProbeResponse {
            status,
            headers: CacheHeaders::default(),
        };
        assert!(resp(200).is_live());
        assert!(resp(302).is_live());
        assert!(!resp(404).is_live());
        assert!(!resp(500).is_live());
    }
}
