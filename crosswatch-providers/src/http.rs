//! The instrumented HTTP session every adapter is built on: labeled
//! endpoints, 429-aware retry with backoff, and rate-limit header parsing.
//!
//! Ground truth: `examples/original_source/providers/sync/_mod_common.py`
//! (`request_with_retries`, `parse_rate_limit`, the per-vendor `label_*`
//! helpers).

use std::sync::LazyLock;
use std::time::Duration;

use reqwest::{Client, Method, Response, StatusCode};
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// Shared client across every adapter instance: one connection pool, kept
/// warm for the lifetime of the process.
static SHARED_CLIENT: LazyLock<Client> = LazyLock::new(|| {
    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(30))
        .pool_max_idle_per_host(10)
        .user_agent(concat!("crosswatch/", env!("CARGO_PKG_VERSION")))
        .build()
        .expect("failed to build shared HTTP client")
});

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RateLimit {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset: Option<u64>,
}

/// Parses `X-RateLimit-*` and bare `RateLimit-*` header variants. Header
/// lookups are case-insensitive (`reqwest::header::HeaderMap`), so unlike
/// the original we don't need to try multiple literal casings.
#[must_use]
pub fn parse_rate_limit(headers: &reqwest::header::HeaderMap) -> RateLimit {
    let get_u64 = |names: &[&str]| -> Option<u64> {
        names
            .iter()
            .find_map(|n| headers.get(*n).and_then(|v| v.to_str().ok()).and_then(|s| s.trim().parse().ok()))
    };
    RateLimit {
        limit: get_u64(&["x-ratelimit-limit", "ratelimit-limit"]),
        remaining: get_u64(&["x-ratelimit-remaining", "ratelimit-remaining"]),
        reset: get_u64(&["x-ratelimit-reset", "ratelimit-reset"]),
    }
}

/// Parses a `Retry-After` header in either form RFC 7231 allows: a delay in
/// seconds, or an HTTP-date naming the moment to retry at (converted to a
/// seconds-from-now delta, floored at zero for a date already in the past).
fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    let raw = headers.get(reqwest::header::RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = raw.parse() {
        return Some(secs);
    }
    let at = chrono::DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&chrono::Utc);
    Some((at - chrono::Utc::now()).num_seconds().max(0) as u64)
}

/// Stable endpoint classification for observability and event routing,
/// e.g. `"watchlist:index"`, `"ratings:add"`, `"history:remove"`. Each
/// adapter module supplies its own vendor-specific path matcher and falls
/// back to this default.
#[must_use]
pub fn default_label(method: &Method, url: &reqwest::Url) -> String {
    format!("{}:{}", method.as_str().to_ascii_lowercase(), url.path())
}

pub struct RetryConfig {
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_on: &'static [u16],
    pub backoff_base: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_retries: 3,
            retry_on: &[429, 500, 502, 503, 504],
            backoff_base: Duration::from_millis(500),
        }
    }
}

/// The shared instrumented session. Adapters wrap this with their own
/// per-vendor header/auth logic; this type owns only retry/backoff/labeling.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    #[must_use]
    pub fn new() -> Self {
        Self { client: SHARED_CLIENT.clone() }
    }

    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// `request_with_retries`: exponential backoff (`base * 2^i`), clamped
    /// *upward* (never down) by `Retry-After` on 429. Returns the last HTTP
    /// response without erroring when retries are exhausted on a status-code
    /// failure; only transport-level errors propagate as `Err`.
    pub async fn request_with_retries(
        &self,
        method: Method,
        url: &str,
        build: impl Fn(reqwest::RequestBuilder) -> reqwest::RequestBuilder,
        cfg: &RetryConfig,
    ) -> Result<Response, ProviderError> {
        let mut last_err: Option<ProviderError> = None;

        for attempt in 0..=cfg.max_retries {
            let req = build(self.client.request(method.clone(), url).timeout(cfg.timeout));
            match req.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if !cfg.retry_on.contains(&status.as_u16()) || attempt == cfg.max_retries {
                        return Ok(resp);
                    }
                    let mut wait = cfg.backoff_base * 2u32.pow(attempt);
                    if status == StatusCode::TOO_MANY_REQUESTS {
                        if let Some(secs) = parse_retry_after(resp.headers()) {
                            wait = wait.max(Duration::from_secs(secs));
                        }
                    }
                    tracing::debug!(%url, %status, attempt, wait_ms = wait.as_millis() as u64, "retrying request");
                    tokio::time::sleep(wait).await;
                }
                Err(err) => {
                    let mapped = ProviderError::from(err);
                    if attempt == cfg.max_retries {
                        return Err(mapped);
                    }
                    last_err = Some(mapped);
                    tokio::time::sleep(cfg.backoff_base * 2u32.pow(attempt)).await;
                }
            }
        }

        Err(last_err.unwrap_or(ProviderError::Timeout))
    }

    /// Convenience wrapper for the common case: a single request with no
    /// custom retry policy, mapping non-2xx status to `ProviderError`
    /// without retrying (used for one-shot health probes).
    pub async fn send_once(
        &self,
        method: Method,
        url: &str,
        build: impl FnOnce(reqwest::RequestBuilder) -> reqwest::RequestBuilder,
        timeout: Duration,
    ) -> Result<Response, ProviderError> {
        let req = build(self.client.request(method, url).timeout(timeout));
        Ok(req.send().await?)
    }
}

/// Maps an HTTP status to a `ProviderError` per the §7 failure semantics:
/// 401/403 → auth_failed (no retry), other non-2xx → upstream_error.
/// Callers apply the per-op 404/409/422 success exceptions themselves,
/// since those only hold for delete/add respectively.
pub async fn status_to_error(resp: Response) -> ProviderError {
    let status = resp.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return ProviderError::AuthFailed(format!("http {status}"));
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after_s = parse_retry_after(resp.headers());
        return ProviderError::RateLimited { retry_after_s };
    }
    let body = resp.text().await.unwrap_or_default();
    ProviderError::Upstream { status: status.as_u16(), body }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

    #[test]
    fn parses_x_ratelimit_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(HeaderName::from_static("x-ratelimit-limit"), HeaderValue::from_static("100"));
        headers.insert(HeaderName::from_static("x-ratelimit-remaining"), HeaderValue::from_static("42"));
        let rl = parse_rate_limit(&headers);
        assert_eq!(rl.limit, Some(100));
        assert_eq!(rl.remaining, Some(42));
    }

    #[test]
    fn parses_bare_ratelimit_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(HeaderName::from_static("ratelimit-remaining"), HeaderValue::from_static("7"));
        let rl = parse_rate_limit(&headers);
        assert_eq!(rl.remaining, Some(7));
        assert_eq!(rl.limit, None);
    }

    #[test]
    fn default_label_uses_method_and_path() {
        let url = reqwest::Url::parse("https://api.example.com/sync/watchlist?x=1").unwrap();
        assert_eq!(default_label(&Method::GET, &url), "get:/sync/watchlist");
    }

    #[test]
    fn parses_retry_after_seconds_form() {
        let mut headers = HeaderMap::new();
        headers.insert(reqwest::header::RETRY_AFTER, HeaderValue::from_static("120"));
        assert_eq!(parse_retry_after(&headers), Some(120));
    }

    #[test]
    fn parses_retry_after_http_date_form() {
        let future = chrono::Utc::now() + chrono::Duration::seconds(60);
        let header_value = future.format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let mut headers = HeaderMap::new();
        headers.insert(reqwest::header::RETRY_AFTER, HeaderValue::from_str(&header_value).unwrap());

        let secs = parse_retry_after(&headers).expect("HTTP-date form should parse");
        assert!((55..=60).contains(&secs), "expected ~60s, got {secs}");
    }

    #[test]
    fn retry_after_http_date_in_the_past_floors_at_zero() {
        let mut headers = HeaderMap::new();
        headers.insert(reqwest::header::RETRY_AFTER, HeaderValue::from_static("Sun, 06 Nov 1994 08:49:37 GMT"));
        assert_eq!(parse_retry_after(&headers), Some(0));
    }
}
