//! Layered configuration: `<config_dir>/config.json` plus `CW_`-prefixed
//! environment overrides, loaded through the `config` crate the same way the
//! teacher's `Config::load` layers `File` + `Environment` sources.

use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use crosswatch_providers::FeatureFlags;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub type ConfigView = Map<String, Value>;

/// Top-level configuration: provider instance blocks, the pairs to sync, and
/// the ambient logging/runtime knobs.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub config_dir: String,
    pub pairs: Vec<PairConfig>,
    /// `provider kind -> instance id -> config block`. Instance id `"default"`
    /// is used when a provider has only one configured account.
    pub providers: HashMap<String, HashMap<String, ConfigView>>,
    pub logging: LoggingConfig,
    /// `CW_DEBUG` convenience toggle; per-provider override is
    /// `CW_<PROV>_DEBUG`, read directly from the environment rather than
    /// stored here.
    pub debug: bool,
    /// `CW_CAPTURE_MODE=1`: suppress all state/snapshot persistence.
    pub capture_mode: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_dir: default_config_dir(),
            pairs: Vec::new(),
            providers: HashMap::new(),
            logging: LoggingConfig::default(),
            debug: false,
            capture_mode: false,
        }
    }
}

fn default_config_dir() -> String {
    "/config".to_string()
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("config_dir", &self.config_dir)
            .field("pairs", &self.pairs)
            .field("providers", &redact_providers(&self.providers))
            .field("logging", &self.logging)
            .field("debug", &self.debug)
            .field("capture_mode", &self.capture_mode)
            .finish()
    }
}

const SENSITIVE_KEYS: &[&str] = &[
    "account_token",
    "access_token",
    "refresh_token",
    "client_secret",
    "api_key",
    "password",
    "token",
    "secret",
    "session_id",
];

fn redact_providers(
    providers: &HashMap<String, HashMap<String, ConfigView>>,
) -> HashMap<String, HashMap<String, ConfigView>> {
    providers
        .iter()
        .map(|(kind, instances)| {
            let redacted = instances.iter().map(|(inst, view)| (inst.clone(), redact_view(view))).collect();
            (kind.clone(), redacted)
        })
        .collect()
}

fn redact_view(view: &ConfigView) -> ConfigView {
    let mut out = view.clone();
    for key in SENSITIVE_KEYS {
        if out.contains_key(*key) {
            out.insert((*key).to_string(), Value::String("<redacted>".to_string()));
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    Mirror,
    TwoWay,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRef {
    pub provider: String,
    #[serde(default = "default_instance")]
    pub instance: String,
}

fn default_instance() -> String {
    "default".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairConfig {
    pub source: ProviderRef,
    pub target: ProviderRef,
    pub direction: Direction,
    #[serde(default)]
    pub features: FeatureFlags,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl PairConfig {
    /// Scope string used for state/snapshot file naming and for matching
    /// against `CW_PAIR_SCOPE`. Sanitized separately by the caller
    /// (`state::sanitize_pair_scope`) — this only builds the raw form.
    #[must_use]
    pub fn scope_key(&self) -> String {
        format!(
            "{}.{}__{}.{}",
            self.source.provider, self.source.instance, self.target.provider, self.target.instance
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `"pretty"` or `"json"`.
    pub format: String,
    pub file_path: Option<String>,
    /// Per-provider level overrides, keyed by provider name (e.g. `"trakt"`).
    pub provider_levels: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: "pretty".to_string(), file_path: None, provider_levels: HashMap::new() }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. `CW_`-prefixed environment variables (highest priority)
    /// 2. `<config_dir>/config.json`
    /// 3. Defaults (lowest priority)
    pub fn load(config_dir: Option<&str>) -> Result<Self, ConfigError> {
        let dir = config_dir.unwrap_or("/config").to_string();

        let mut builder = ConfigBuilder::builder().set_default("config_dir", dir.clone())?;

        let config_path = Path::new(&dir).join("config.json");
        if config_path.exists() {
            builder = builder.add_source(File::from(config_path).format(config::FileFormat::Json));
        }

        builder = builder.add_source(Environment::with_prefix("CW").separator("__").try_parsing(true));

        let built = builder.build()?;
        built.try_deserialize()
    }

    /// Load from environment variables and the default config dir only.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from an explicit config directory.
    pub fn from_dir(dir: &str) -> Result<Self, ConfigError> {
        Self::load(Some(dir))
    }

    #[must_use]
    pub fn state_dir(&self) -> PathBuf {
        Path::new(&self.config_dir).join(".cw_state")
    }

    #[must_use]
    pub fn local_provider_dir(&self) -> PathBuf {
        Path::new(&self.config_dir).join(".cw_provider")
    }

    #[must_use]
    pub fn snapshot_dir(&self) -> PathBuf {
        Path::new(&self.config_dir).join("snapshots")
    }

    /// Resolves the active pair scope from the first of
    /// `CW_PAIR_SCOPE | CW_PAIR_KEY | CW_SYNC_PAIR | CW_PAIR` that is set.
    #[must_use]
    pub fn active_pair_scope() -> Option<String> {
        for key in ["CW_PAIR_SCOPE", "CW_PAIR_KEY", "CW_SYNC_PAIR", "CW_PAIR"] {
            if let Ok(v) = std::env::var(key) {
                if !v.is_empty() {
                    return Some(v);
                }
            }
        }
        None
    }

    /// Deep-copies only the selected `(provider, instance)` blocks, so a
    /// pair-sync task never holds other instances' credentials in memory.
    #[must_use]
    pub fn build_config_view(&self, selection: &[(&str, &str)]) -> HashMap<String, ConfigView> {
        let mut view = HashMap::new();
        for (provider, instance) in selection {
            if let Some(instances) = self.providers.get(*provider) {
                let chosen = instances.get(*instance).or_else(|| instances.get("default")).cloned().unwrap_or_default();
                view.insert((*provider).to_string(), chosen);
            }
        }
        view
    }

    /// Fail-fast structural checks (distinct from per-adapter
    /// capability validation, which is `Reconciler::validate_pair`).
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        for pair in &self.pairs {
            if pair.source.provider == pair.target.provider && pair.source.instance == pair.target.instance {
                errors.push(format!(
                    "pair {}.{} -> {}.{} has an identical source and target",
                    pair.source.provider, pair.source.instance, pair.target.provider, pair.target.instance
                ));
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Blank or case-insensitive `"default"` normalizes to `"default"`; any other
/// string passes through trimmed but otherwise unsanitized. This is
/// deliberately more lenient than `state::sanitize_pair_scope` — instance ids
/// and pair scopes are normalized differently in the system this was
/// modeled on.
#[must_use]
pub fn normalize_instance_id(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("default") {
        "default".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> Config {
        let mut providers = HashMap::new();
        let mut plex_instances = HashMap::new();
        let mut plex_default = ConfigView::new();
        plex_default.insert("account_token".to_string(), Value::String("secret-token".to_string()));
        plex_instances.insert("default".to_string(), plex_default);
        providers.insert("plex".to_string(), plex_instances);

        Config {
            config_dir: "/tmp/cw".to_string(),
            pairs: vec![PairConfig {
                source: ProviderRef { provider: "plex".to_string(), instance: "default".to_string() },
                target: ProviderRef { provider: "trakt".to_string(), instance: "default".to_string() },
                direction: Direction::Mirror,
                features: FeatureFlags::new(),
                enabled: true,
            }],
            providers,
            logging: LoggingConfig::default(),
            debug: false,
            capture_mode: false,
        }
    }

    #[test]
    fn normalize_instance_id_folds_default_variants() {
        assert_eq!(normalize_instance_id(""), "default");
        assert_eq!(normalize_instance_id("  "), "default");
        assert_eq!(normalize_instance_id("DEFAULT"), "default");
        assert_eq!(normalize_instance_id(" PROV-P01 "), "PROV-P01");
    }

    #[test]
    fn debug_output_redacts_credentials() {
        let config = sample_config();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("secret-token"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn build_config_view_copies_only_selected_instance() {
        let config = sample_config();
        let view = config.build_config_view(&[("plex", "default")]);
        assert!(view.contains_key("plex"));
        assert_eq!(view["plex"].get("account_token").and_then(Value::as_str), Some("secret-token"));
    }

    #[test]
    fn validate_rejects_identical_source_and_target() {
        let mut config = sample_config();
        config.pairs[0].target = config.pairs[0].source.clone();
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("identical")));
    }

    #[test]
    fn pair_scope_key_is_deterministic() {
        let config = sample_config();
        assert_eq!(config.pairs[0].scope_key(), "plex.default__trakt.default");
    }
}
