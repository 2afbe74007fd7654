//! Enumerates the statically known provider adapters, their manifests, and
//! aggregate health across configured instances. Rebuilt fresh from the
//! current `Config` on every query rather than cached, so config edits take
//! effect without a restart.

use std::collections::HashMap;

use crosswatch_providers::{HealthReport, Manifest, ProviderAdapter};

use crate::config::{Config, ConfigView};

pub struct ManifestRegistry {
    adapters: Vec<Box<dyn ProviderAdapter>>,
}

impl Default for ManifestRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ManifestRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self { adapters: crosswatch_providers::all_adapters() }
    }

    fn adapter(&self, provider: &str) -> Option<&dyn ProviderAdapter> {
        self.adapters.iter().map(std::convert::AsRef::as_ref).find(|a| a.manifest().name == provider)
    }

    /// One `Manifest` per registered adapter, regardless of configuration.
    #[must_use]
    pub fn manifests(&self) -> Vec<Manifest> {
        self.adapters.iter().map(|a| a.manifest()).collect()
    }

    /// `(provider, instance)` pairs actually present in `config.providers`,
    /// restricted to providers this registry knows how to construct.
    #[must_use]
    pub fn configured_instances(&self, config: &Config) -> Vec<(String, String)> {
        let mut out = Vec::new();
        for adapter in &self.adapters {
            let name = adapter.manifest().name;
            if let Some(instances) = config.providers.get(name) {
                for instance in instances.keys() {
                    out.push((name.to_string(), instance.clone()));
                }
            }
        }
        out
    }

    /// Looks up an adapter and the config view for one configured instance.
    #[must_use]
    pub fn resolve<'a>(
        &'a self,
        config: &Config,
        provider: &str,
        instance: &str,
    ) -> Option<(&'a dyn ProviderAdapter, ConfigView)> {
        let adapter = self.adapter(provider)?;
        let cfg_view = config.providers.get(provider)?.get(instance)?.clone();
        Some((adapter, cfg_view))
    }

    /// Aggregate health across every configured `(provider, instance)`,
    /// keyed by `"<provider>.<instance>"`.
    pub async fn health_all(&self, config: &Config) -> HashMap<String, HealthReport> {
        let mut out = HashMap::new();
        for (provider, instance) in self.configured_instances(config) {
            let Some((adapter, cfg_view)) = self.resolve(config, &provider, &instance) else {
                continue;
            };
            let report = adapter.health(&cfg_view).await;
            out.insert(format!("{provider}.{instance}"), report);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;

    #[test]
    fn manifests_covers_every_registered_adapter() {
        let registry = ManifestRegistry::new();
        let names: Vec<_> = registry.manifests().iter().map(|m| m.name).collect();
        assert!(names.contains(&"plex"));
        assert!(names.contains(&"trakt"));
        assert!(names.contains(&"local"));
    }

    #[test]
    fn configured_instances_reflects_config_only() {
        let registry = ManifestRegistry::new();
        let mut config = Config::default();
        let mut plex_instances = StdHashMap::new();
        plex_instances.insert("default".to_string(), ConfigView::new());
        config.providers.insert("plex".to_string(), plex_instances);

        let instances = registry.configured_instances(&config);
        assert_eq!(instances, vec![("plex".to_string(), "default".to_string())]);
    }

    #[test]
    fn resolve_returns_none_for_unconfigured_instance() {
        let registry = ManifestRegistry::new();
        let config = Config::default();
        assert!(registry.resolve(&config, "plex", "default").is_none());
    }
}
