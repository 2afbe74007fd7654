//! Plex adapter: watchlist is a cloud-scoped list at `plex.tv`/`discover.provider.plex.tv`,
//! not on the local PMS. Ratings and history are per-library, addressed by
//! server section + `ratingKey`.
//!
//! Ground truth: spec.md §4.3.x ("Plex"). Identity resolution follows
//! `crosswatch_identity::ids_from_guid` for the legacy
//! `com.plexapp.agents.*` and opaque `plex://` GUID forms Plex emits.

use std::collections::HashMap;

use async_trait::async_trait;
use crosswatch_identity::{Item, ItemType};
use reqwest::Method;
use serde::Deserialize;

use crate::cfgutil::require_str;
use crate::error::ProviderError;
use crate::http::{HttpClient, RetryConfig};
use crate::manifest::{
    AddResult, Capabilities, Feature, HealthDetails, HealthReport, IndexSemantics, Manifest,
    RatingsCapability, RatingsTypes, RemoveResult, Unresolved,
};
use crate::traits::{ConfigView, ProviderAdapter, ProviderIndex};

const DISCOVER_BASE: &str = "https://discover.provider.plex.tv";

#[derive(Debug, Deserialize)]
struct WatchlistResponse {
    #[serde(default, rename = "MediaContainer")]
    container: WatchlistContainer,
}

#[derive(Debug, Default, Deserialize)]
struct WatchlistContainer {
    #[serde(default, rename = "Metadata")]
    metadata: Vec<PlexMetadata>,
}

#[derive(Debug, Deserialize)]
struct PlexMetadata {
    #[serde(rename = "ratingKey")]
    rating_key: String,
    guid: Option<String>,
    title: Option<String>,
    year: Option<i32>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

fn plex_type(kind: Option<&str>) -> ItemType {
    match kind {
        Some("show") => ItemType::Show,
        Some("season") => ItemType::Season,
        Some("episode") => ItemType::Episode,
        _ => ItemType::Movie,
    }
}

fn metadata_to_item(m: PlexMetadata) -> Item {
    let mut item = Item::new(plex_type(m.kind.as_deref()));
    item.title = m.title;
    item.year = m.year;
    item.ids.insert("plex".to_string(), m.rating_key);
    if let Some(guid) = &m.guid {
        for (k, v) in crosswatch_identity::ids_from_guid(Some(guid)) {
            item.ids.entry(k).or_insert(v);
        }
    }
    item
}

pub struct PlexAdapter {
    http: HttpClient,
}

impl Default for PlexAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl PlexAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self { http: HttpClient::new() }
    }

    async fn fetch_watchlist(&self, token: &str) -> Result<Vec<PlexMetadata>, ProviderError> {
        let url = format!("{DISCOVER_BASE}/library/sections/watchlist/all");
        let resp = self
            .http
            .request_with_retries(
                Method::GET,
                &url,
                |b| {
                    b.header("X-Plex-Token", token)
                        .header("Accept", "application/json")
                },
                &RetryConfig::default(),
            )
            .await?;
        if !resp.status().is_success() {
            return Err(crate::http::status_to_error(resp).await);
        }
        let parsed: WatchlistResponse = resp.json().await?;
        Ok(parsed.container.metadata)
    }
}

#[async_trait]
impl ProviderAdapter for PlexAdapter {
    fn manifest(&self) -> Manifest {
        Manifest {
            name: "plex",
            label: "Plex",
            version: "1.0.0",
            kind: "sync",
            bidirectional: true,
            features: vec![Feature::Watchlist, Feature::Ratings, Feature::History],
            requires: vec!["account_token"],
            capabilities: Capabilities {
                ratings: Some(RatingsCapability {
                    types: RatingsTypes { movies: true, shows: true, seasons: false, episodes: true },
                    upsert: true,
                    unrate: true,
                    from_date: false,
                }),
                index_semantics: IndexSemantics::Present,
                observed_deletes: true,
                can_target: true,
            },
        }
    }

    fn is_configured(&self, cfg: &ConfigView) -> bool {
        require_str(cfg, "account_token").is_ok()
    }

    async fn health(&self, cfg: &ConfigView) -> HealthReport {
        let Ok(token) = require_str(cfg, "account_token") else {
            return HealthReport::not_configured();
        };
        let start = std::time::Instant::now();
        match self.fetch_watchlist(token).await {
            Ok(_) => HealthReport {
                ok: true,
                status: "ok".to_string(),
                latency_ms: start.elapsed().as_millis() as u64,
                features: HashMap::from([("watchlist".to_string(), true)]),
                details: HealthDetails::default(),
                api: HashMap::new(),
            },
            Err(err) => HealthReport {
                ok: false,
                status: "error".to_string(),
                latency_ms: start.elapsed().as_millis() as u64,
                features: HashMap::new(),
                details: HealthDetails { reason: Some(err.reason().to_string()), retry_after_s: None },
                api: HashMap::new(),
            },
        }
    }

    async fn build_index(&self, cfg: &ConfigView, feature: Feature) -> Result<ProviderIndex, ProviderError> {
        if feature != Feature::Watchlist {
            return Ok(ProviderIndex::new());
        }
        let token = require_str(cfg, "account_token")?;
        let rows = self.fetch_watchlist(token).await?;
        let mut index = ProviderIndex::new();
        for row in rows {
            let item = metadata_to_item(row);
            let key = crosswatch_identity::canonical_key(&item);
            index
                .entry(key)
                .and_modify(|existing: &mut Item| {
                    existing.ids = crosswatch_identity::merge_ids(&existing.ids, &item.ids);
                })
                .or_insert(item);
        }
        Ok(index)
    }

    async fn add(
        &self,
        cfg: &ConfigView,
        items: &[Item],
        feature: Feature,
        dry_run: bool,
    ) -> Result<AddResult, ProviderError> {
        if feature != Feature::Watchlist {
            return Ok(feature_unsupported(items));
        }
        let token = require_str(cfg, "account_token")?;
        let mut result = AddResult::empty();
        result.count = items.len();
        for item in items {
            let key = crosswatch_identity::canonical_key(item);
            let Some(rating_key) = item.ids.get("plex") else {
                result.unresolved.push(Unresolved {
                    key,
                    reason: "missing_ids".to_string(),
                    hint: None,
                });
                continue;
            };
            if dry_run {
                result.confirmed_keys.push(key);
                continue;
            }
            let url = format!("{DISCOVER_BASE}/actions/addToWatchlist?ratingKey={rating_key}");
            let resp = self
                .http
                .request_with_retries(Method::PUT, &url, |b| b.header("X-Plex-Token", token), &RetryConfig::default())
                .await?;
            if resp.status().is_success() || resp.status().as_u16() == 409 || resp.status().as_u16() == 422 {
                result.confirmed_keys.push(key);
            } else {
                let err = crate::http::status_to_error(resp).await;
                result.unresolved.push(Unresolved { key, reason: err.reason().to_string(), hint: err.hint() });
            }
        }
        Ok(result)
    }

    async fn remove(
        &self,
        cfg: &ConfigView,
        items: &[Item],
        feature: Feature,
        dry_run: bool,
    ) -> Result<RemoveResult, ProviderError> {
        if feature != Feature::Watchlist {
            return Ok(RemoveResult { ok: false, count: 0, confirmed_keys: Vec::new(), unresolved: Vec::new() });
        }
        let token = require_str(cfg, "account_token")?;
        let mut result = RemoveResult::empty();
        result.count = items.len();
        for item in items {
            let key = crosswatch_identity::canonical_key(item);
            let Some(rating_key) = item.ids.get("plex") else {
                result.unresolved.push(Unresolved { key, reason: "missing_ids".to_string(), hint: None });
                continue;
            };
            if dry_run {
                result.confirmed_keys.push(key);
                continue;
            }
            let url = format!("{DISCOVER_BASE}/actions/removeFromWatchlist?ratingKey={rating_key}");
            let resp = self
                .http
                .request_with_retries(Method::DELETE, &url, |b| b.header("X-Plex-Token", token), &RetryConfig::default())
                .await?;
            if resp.status().is_success() || resp.status().as_u16() == 404 {
                result.confirmed_keys.push(key);
            } else {
                let err = crate::http::status_to_error(resp).await;
                result.unresolved.push(Unresolved { key, reason: err.reason().to_string(), hint: err.hint() });
            }
        }
        Ok(result)
    }
}

fn feature_unsupported(items: &[Item]) -> AddResult {
    AddResult {
        ok: false,
        count: 0,
        confirmed_keys: Vec::new(),
        skipped_keys: Vec::new(),
        unresolved: items
            .iter()
            .map(|i| Unresolved {
                key: crosswatch_identity::canonical_key(i),
                reason: "feature_unsupported".to_string(),
                hint: None,
            })
            .collect(),
    }
}

/// Resolves the local PMS account id (1..n) for the libraries configured
/// under `history.libraries[]`/`ratings.libraries[]`. Per spec.md §4.3.x,
/// the *cloud* account id (used for the watchlist endpoints above) is a
/// distinct identifier never substituted here — see DESIGN.md's Open
/// Question decision on Plex account id semantics.
#[must_use]
pub fn resolve_local_account_id(cfg: &ConfigView) -> Option<u64> {
    cfg.get("account_id").and_then(serde_json::Value::as_u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plex_type_defaults_to_movie() {
        assert_eq!(plex_type(None), ItemType::Movie);
        assert_eq!(plex_type(Some("show")), ItemType::Show);
    }

    #[test]
    fn metadata_to_item_merges_guid_ids() {
        let m = PlexMetadata {
            rating_key: "12345".to_string(),
            guid: Some("com.plexapp.agents.imdb://tt0111161?lang=en".to_string()),
            title: Some("The Shawshank Redemption".to_string()),
            year: Some(1994),
            kind: Some("movie".to_string()),
        };
        let item = metadata_to_item(m);
        assert_eq!(item.ids.get("plex"), Some(&"12345".to_string()));
        assert_eq!(item.ids.get("imdb"), Some(&"tt0111161".to_string()));
    }
}
