//! Structured logging bootstrap. Level/format are driven by config, with
//! `CW_LOG_LEVEL`/`CW_LOG_FORMAT` and per-provider `CW_<PROV>_LOG_LEVEL`
//! overrides layered on top via `EnvFilter` directives.

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::LoggingConfig;

/// Initialize structured logging. `JSON` format is meant for unattended
/// runs (cron, CI); `pretty` for interactive terminal use.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let log_level = parse_log_level(&config.level)?;

    let mut filter_spec = log_level.to_string();
    for (provider, level) in &config.provider_levels {
        filter_spec.push_str(&format!(",crosswatch_providers::{provider}={level}"));
    }

    let env_filter = EnvFilter::try_from_env("CW_LOG_LEVEL")
        .or_else(|_| EnvFilter::try_new(&filter_spec))
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    let registry = tracing_subscriber::registry().with(env_filter);

    if config.format.as_str() == "json" {
        let json_layer = fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_current_span(true)
            .with_target(true)
            .with_line_number(true)
            .with_file(true);
        registry.with(json_layer).try_init()?;
    } else {
        let pretty_layer = fmt::layer().pretty().with_span_events(FmtSpan::CLOSE).with_target(true);
        registry.with(pretty_layer).try_init()?;
    }

    Ok(())
}

fn parse_log_level(level: &str) -> anyhow::Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" | "warning" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(anyhow::anyhow!("invalid log level: {level}")),
    }
}

/// Reads `CW_LOG_LEVEL`, `CW_LOG_FORMAT`, and `CW_<PROV>_LOG_LEVEL` (for
/// every key in `known_providers`) and applies them over `base`.
#[must_use]
pub fn apply_env_overrides(mut base: LoggingConfig, known_providers: &[&str]) -> LoggingConfig {
    if let Ok(level) = std::env::var("CW_LOG_LEVEL") {
        base.level = level;
    }
    if let Ok(format) = std::env::var("CW_LOG_FORMAT") {
        base.format = format;
    }
    for provider in known_providers {
        let key = format!("CW_{}_LOG_LEVEL", provider.to_uppercase());
        if let Ok(level) = std::env::var(key) {
            base.provider_levels.insert((*provider).to_string(), level);
        }
    }
    base
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_log_level_rejects_garbage() {
        assert!(parse_log_level("trace").is_ok());
        assert!(parse_log_level("not-a-level").is_err());
    }

    #[test]
    fn env_override_sets_provider_level() {
        std::env::set_var("CW_TRAKT_LOG_LEVEL", "debug");
        let cfg = apply_env_overrides(LoggingConfig::default(), &["trakt"]);
        assert_eq!(cfg.provider_levels.get("trakt"), Some(&"debug".to_string()));
        std::env::remove_var("CW_TRAKT_LOG_LEVEL");
    }
}
