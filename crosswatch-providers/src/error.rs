//! The error taxonomy shared by every adapter.
//!
//! Kinds mirror the abstract taxonomy surfaced in `unresolved[].reason` and
//! `health.status`: adapters never invent their own error shapes, they map
//! vendor-specific failures onto these variants.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("rate limited, retry after {retry_after_s:?}s")]
    RateLimited { retry_after_s: Option<u64> },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("missing ids: {0}")]
    MissingIds(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("upstream error {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("cancelled")]
    Cancelled,

    #[error("timeout")]
    Timeout,

    #[error("parse error: {0}")]
    Parse(String),

    #[error("read-only provider")]
    ReadOnly,
}

impl ProviderError {
    /// The stable reason string recorded in `unresolved[].reason` / shadow
    /// entries (§7 taxonomy names).
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::MissingConfig(_) => "missing_config",
            Self::AuthFailed(_) => "auth_failed",
            Self::RateLimited { .. } => "rate_limited",
            Self::NotFound(_) => "not_found",
            Self::MissingIds(_) => "missing_ids",
            Self::Network(_) => "network_error",
            Self::Upstream { .. } => "upstream_error",
            Self::Conflict(_) => "conflict",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
            Self::Parse(_) => "parse_error",
            Self::ReadOnly => "read_only",
        }
    }

    /// A machine-stable hint suitable for `unresolved[].hint` (e.g.
    /// `"http:429"`), when one applies.
    #[must_use]
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::Upstream { status, .. } => Some(format!("http:{status}")),
            Self::RateLimited { .. } => Some("http:429".to_string()),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_matches_taxonomy_name() {
        assert_eq!(ProviderError::MissingConfig("x".into()).reason(), "missing_config");
        assert_eq!(ProviderError::AuthFailed("x".into()).reason(), "auth_failed");
        assert_eq!(ProviderError::Upstream { status: 500, body: String::new() }.reason(), "upstream_error");
    }

    #[test]
    fn upstream_hint_carries_status() {
        let err = ProviderError::Upstream { status: 503, body: String::new() };
        assert_eq!(err.hint(), Some("http:503".to_string()));
    }
}
