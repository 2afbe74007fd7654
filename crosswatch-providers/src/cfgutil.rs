//! Small helpers for pulling typed fields out of a [`ConfigView`].

use crate::traits::ConfigView;

#[must_use]
pub fn str_field<'a>(cfg: &'a ConfigView, key: &str) -> Option<&'a str> {
    cfg.get(key).and_then(serde_json::Value::as_str).filter(|s| !s.is_empty())
}

#[must_use]
pub fn owned_str(cfg: &ConfigView, key: &str) -> Option<String> {
    str_field(cfg, key).map(str::to_string)
}

#[must_use]
pub fn bool_field(cfg: &ConfigView, key: &str, default: bool) -> bool {
    cfg.get(key).and_then(serde_json::Value::as_bool).unwrap_or(default)
}

#[must_use]
pub fn u64_field(cfg: &ConfigView, key: &str, default: u64) -> u64 {
    cfg.get(key).and_then(serde_json::Value::as_u64).unwrap_or(default)
}

#[must_use]
pub fn require_str<'a>(cfg: &'a ConfigView, key: &str) -> Result<&'a str, crate::error::ProviderError> {
    str_field(cfg, key).ok_or_else(|| crate::error::ProviderError::MissingConfig(key.to_string()))
}
