//! The adapter interface every backend implements.
//!
//! Ground truth for the shape of this trait: `MediaProvider` in the
//! teacher's provider layer — one mandatory capability surface, everything
//! else a uniform set of async methods over a `ConfigView`.

use std::collections::HashMap;

use async_trait::async_trait;
use crosswatch_identity::Item;

use crate::error::ProviderError;
use crate::manifest::{AddResult, Capabilities, Feature, FeatureFlags, HealthReport, Manifest, RemoveResult};

/// A read-only, already-scoped view of one provider instance's
/// configuration. Built once per pair-sync by
/// `build_config_view`/`build_provider_config_view` (crosswatch crate) and
/// handed to the adapter by value — adapters never see other instances'
/// credentials and never mutate the shared `Config`.
pub type ConfigView = serde_json::Map<String, serde_json::Value>;

/// The complete present-set index for one feature: `canonical_key → Item`.
/// Stored as a `BTreeMap` so JSON serialization of cached indexes sorts
/// keys deterministically without an extra dependency.
pub type ProviderIndex = std::collections::BTreeMap<String, Item>;

/// Uniform capability interface implemented by every backend (Plex,
/// Jellyfin/Emby, Trakt, SIMKL, MDBList, TMDb, AniList, Tautulli, and the
/// local CrossWatch store).
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Static description: name, label, supported features, capabilities.
    fn manifest(&self) -> Manifest;

    /// Effectively-enabled features given the current build (all adapters
    /// in this crate compile in every feature they declare in `manifest`,
    /// so the default just mirrors the manifest).
    fn features(&self) -> FeatureFlags {
        self.manifest().features.into_iter().map(|f| (f, true)).collect()
    }

    fn capabilities(&self) -> Capabilities {
        self.manifest().capabilities
    }

    /// Whether `cfg` carries the credentials/URLs this adapter needs for
    /// at least one instance.
    fn is_configured(&self, cfg: &ConfigView) -> bool;

    /// A single cheap probe per relevant endpoint.
    async fn health(&self, cfg: &ConfigView) -> HealthReport;

    /// The complete present set for `feature` under `cfg`.
    async fn build_index(&self, cfg: &ConfigView, feature: Feature) -> Result<ProviderIndex, ProviderError>;

    /// Idempotent upsert. `dry_run` computes the result without mutating
    /// the vendor.
    async fn add(
        &self,
        cfg: &ConfigView,
        items: &[Item],
        feature: Feature,
        dry_run: bool,
    ) -> Result<AddResult, ProviderError>;

    /// Idempotent deletion. `dry_run` computes the result without mutating
    /// the vendor.
    async fn remove(
        &self,
        cfg: &ConfigView,
        items: &[Item],
        feature: Feature,
        dry_run: bool,
    ) -> Result<RemoveResult, ProviderError>;
}

/// Default `health` body for adapters whose preflight is just "can we
/// build an index without error" — most read/write adapters override this
/// with a dedicated cheap ping instead.
pub async fn probe_via_build_index(
    adapter: &dyn ProviderAdapter,
    cfg: &ConfigView,
    probe_feature: Feature,
) -> HealthReport {
    let start = std::time::Instant::now();
    let mut features = HashMap::new();
    for f in Feature::ALL {
        features.insert(f.as_str().to_string(), adapter.features().get(&f).copied().unwrap_or(false));
    }

    match adapter.build_index(cfg, probe_feature).await {
        Ok(_) => HealthReport {
            ok: true,
            status: "ok".to_string(),
            latency_ms: start.elapsed().as_millis() as u64,
            features,
            details: crate::manifest::HealthDetails::default(),
            api: HashMap::new(),
        },
        Err(err) => HealthReport {
            ok: false,
            status: "error".to_string(),
            latency_ms: start.elapsed().as_millis() as u64,
            features,
            details: crate::manifest::HealthDetails {
                reason: Some(err.reason().to_string()),
                retry_after_s: match &err {
                    ProviderError::RateLimited { retry_after_s } => *retry_after_s,
                    _ => None,
                },
            },
            api: HashMap::new(),
        },
    }
}
