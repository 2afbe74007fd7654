//! The orchestration-level error type. Adapter failures
//! (`crosswatch_providers::ProviderError`) are wrapped rather than
//! flattened, so a pair-sync failure can still report which backend and
//! which operation produced it.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("unknown provider kind: {0}")]
    UnknownProvider(String),

    #[error("pair {pair} is not valid: {reason}")]
    InvalidPair { pair: String, reason: String },

    #[error("provider {provider} ({op}): {source}")]
    Provider {
        provider: String,
        op: &'static str,
        #[source]
        source: crosswatch_providers::ProviderError,
    },

    #[error("state store error: {0}")]
    State(String),

    #[error("snapshot error: {0}")]
    Snapshot(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_wraps_with_context() {
        let err = CoreError::Provider {
            provider: "plex".to_string(),
            op: "build_index",
            source: crosswatch_providers::ProviderError::AuthFailed("bad token".to_string()),
        };
        assert!(err.to_string().contains("plex"));
        assert!(err.to_string().contains("build_index"));
    }
}
