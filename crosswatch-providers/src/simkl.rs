//! SIMKL adapter. Id surface is intentionally narrow: `{simkl, imdb, tmdb,
//! tvdb, slug}` only — SIMKL has no stable anime-specific id CrossWatch can
//! rely on, so AniList/MAL ids are never read from or written to it.
//!
//! Ground truth: spec.md §4.3.x ("SIMKL"). The example pack's
//! `original_source/` has no SIMKL sync module to ground against; this
//! adapter mirrors Trakt's shape since both vendors expose the same kind
//! of bearer-token REST surface.

use std::collections::HashMap;

use async_trait::async_trait;
use crosswatch_identity::{Item, ItemType};
use reqwest::Method;
use serde::Deserialize;
use serde_json::Value;

use crate::cfgutil::require_str;
use crate::error::ProviderError;
use crate::http::{HttpClient, RetryConfig};
use crate::manifest::{
    AddResult, Capabilities, Feature, HealthDetails, HealthReport, IndexSemantics, Manifest,
    RatingsCapability, RatingsTypes, RemoveResult, Unresolved,
};
use crate::traits::{ConfigView, ProviderAdapter, ProviderIndex};

const API_BASE: &str = "https://api.simkl.com";
const ID_KEYS: [&str; 5] = ["simkl", "imdb", "tmdb", "tvdb", "slug"];

#[derive(Debug, Default, Deserialize)]
struct SimklIds {
    #[serde(default)]
    simkl: Option<serde_json::Number>,
    #[serde(default)]
    imdb: Option<String>,
    #[serde(default)]
    tmdb: Option<serde_json::Number>,
    #[serde(default)]
    tvdb: Option<serde_json::Number>,
    #[serde(default)]
    slug: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SimklMedia {
    title: Option<String>,
    year: Option<i32>,
    ids: SimklIds,
}

#[derive(Debug, Deserialize)]
struct SimklEntry {
    #[serde(default)]
    movie: Option<SimklMedia>,
    #[serde(default)]
    show: Option<SimklMedia>,
    #[serde(default)]
    user_rating: Option<u8>,
    #[serde(default)]
    rated_at: Option<String>,
}

fn media_to_item(kind: ItemType, media: &SimklMedia) -> Item {
    let mut item = Item::new(kind);
    item.title = media.title.clone();
    item.year = media.year;
    if let Some(v) = &media.ids.simkl {
        if let Some(n) = crosswatch_identity::normalize("simkl", &v.to_string()) {
            item.ids.insert("simkl".to_string(), n);
        }
    }
    if let Some(v) = &media.ids.imdb {
        if let Some(n) = crosswatch_identity::normalize("imdb", v) {
            item.ids.insert("imdb".to_string(), n);
        }
    }
    if let Some(v) = &media.ids.tmdb {
        if let Some(n) = crosswatch_identity::normalize("tmdb", &v.to_string()) {
            item.ids.insert("tmdb".to_string(), n);
        }
    }
    if let Some(v) = &media.ids.tvdb {
        if let Some(n) = crosswatch_identity::normalize("tvdb", &v.to_string()) {
            item.ids.insert("tvdb".to_string(), n);
        }
    }
    if let Some(v) = &media.ids.slug {
        if let Some(n) = crosswatch_identity::normalize("slug", v) {
            item.ids.insert("slug".to_string(), n);
        }
    }
    item
}

/// Projects an [`Item`]'s ids down to SIMKL's narrow id surface, dropping
/// anything (`trakt`, `plex`, `anilist`, ...) it wouldn't understand.
fn simkl_ids_payload(item: &Item) -> serde_json::Map<String, Value> {
    let mut ids = serde_json::Map::new();
    for k in ID_KEYS {
        if let Some(v) = item.ids.get(k) {
            if matches!(k, "simkl" | "tmdb" | "tvdb") {
                if let Ok(n) = v.parse::<i64>() {
                    ids.insert(k.to_string(), Value::from(n));
                    continue;
                }
            }
            ids.insert(k.to_string(), Value::from(v.as_str()));
        }
    }
    ids
}

fn items_to_body(items: &[Item]) -> Value {
    let mut movies = Vec::new();
    let mut shows = Vec::new();
    for item in items {
        let ids = simkl_ids_payload(item);
        let entry = serde_json::json!({ "ids": ids });
        match item.item_type {
            ItemType::Movie => movies.push(entry),
            _ => shows.push(entry),
        }
    }
    serde_json::json!({ "movies": movies, "shows": shows })
}

pub struct SimklAdapter {
    http: HttpClient,
}

impl Default for SimklAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl SimklAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self { http: HttpClient::new() }
    }

    fn auth(&self, b: reqwest::RequestBuilder, token: &str, client_id: &str) -> reqwest::RequestBuilder {
        b.bearer_auth(token).header("simkl-api-key", client_id)
    }
}

#[async_trait]
impl ProviderAdapter for SimklAdapter {
    fn manifest(&self) -> Manifest {
        Manifest {
            name: "simkl",
            label: "SIMKL",
            version: "1.0.0",
            kind: "sync",
            bidirectional: true,
            features: vec![Feature::Watchlist, Feature::Ratings, Feature::History],
            requires: vec!["access_token", "client_id"],
            capabilities: Capabilities {
                ratings: Some(RatingsCapability {
                    types: RatingsTypes { movies: true, shows: true, seasons: false, episodes: false },
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
        require_str(cfg, "access_token").is_ok() && require_str(cfg, "client_id").is_ok()
    }

    async fn health(&self, cfg: &ConfigView) -> HealthReport {
        let (Ok(token), Ok(client_id)) = (require_str(cfg, "access_token"), require_str(cfg, "client_id")) else {
            return HealthReport::not_configured();
        };
        let start = std::time::Instant::now();
        let url = format!("{API_BASE}/sync/all-items/movies");
        match self
            .http
            .send_once(Method::GET, &url, |b| self.auth(b, token, client_id), std::time::Duration::from_secs(8))
            .await
        {
            Ok(resp) if resp.status().is_success() => HealthReport {
                ok: true,
                status: "ok".to_string(),
                latency_ms: start.elapsed().as_millis() as u64,
                features: HashMap::from([("watchlist".to_string(), true)]),
                details: HealthDetails::default(),
                api: HashMap::new(),
            },
            Ok(resp) => HealthReport {
                ok: false,
                status: "error".to_string(),
                latency_ms: start.elapsed().as_millis() as u64,
                features: HashMap::new(),
                details: HealthDetails { reason: Some(format!("http:{}", resp.status())), retry_after_s: None },
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
        let token = require_str(cfg, "access_token")?;
        let client_id = require_str(cfg, "client_id")?;
        let mut index = ProviderIndex::new();
        if matches!(feature, Feature::Playlists) {
            return Ok(index);
        }

        let type_filter = match feature {
            Feature::Watchlist => "plantowatch",
            Feature::Ratings => "all",
            Feature::History => "completed",
            Feature::Playlists => unreachable!(),
        };
        let url = format!("{API_BASE}/sync/all-items/movies,shows/{type_filter}");
        let resp = self
            .http
            .request_with_retries(Method::GET, &url, |b| self.auth(b, token, client_id), &RetryConfig::default())
            .await?;
        if !resp.status().is_success() {
            return Err(crate::http::status_to_error(resp).await);
        }
        let entries: Vec<SimklEntry> = resp.json().await?;
        for entry in &entries {
            let (kind, media) = if let Some(m) = &entry.movie {
                (ItemType::Movie, m)
            } else if let Some(m) = &entry.show {
                (ItemType::Show, m)
            } else {
                continue;
            };
            let mut item = media_to_item(kind, media);
            if feature == Feature::Ratings {
                item.rating = entry.user_rating;
                item.rated_at = entry.rated_at.clone();
            }
            let key = crosswatch_identity::canonical_key(&item);
            index.entry(key).or_insert(item);
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
        if matches!(feature, Feature::Playlists) {
            return Ok(AddResult::read_only());
        }
        let token = require_str(cfg, "access_token")?;
        let client_id = require_str(cfg, "client_id")?;
        let mut result = AddResult::empty();
        result.count = items.len();

        let resolvable: Vec<&Item> = items
            .iter()
            .filter(|i| ID_KEYS.iter().any(|k| i.ids.contains_key(*k)))
            .collect();
        for item in items {
            if !ID_KEYS.iter().any(|k| item.ids.contains_key(*k)) {
                result.unresolved.push(Unresolved {
                    key: crosswatch_identity::canonical_key(item),
                    reason: "missing_ids".to_string(),
                    hint: None,
                });
            }
        }
        if dry_run {
            result.confirmed_keys.extend(resolvable.iter().map(|i| crosswatch_identity::canonical_key(i)));
            return Ok(result);
        }
        if resolvable.is_empty() {
            return Ok(result);
        }

        let owned: Vec<Item> = resolvable.iter().map(|i| (*i).clone()).collect();
        let path = match feature {
            Feature::Watchlist => "/sync/add-to-list",
            Feature::Ratings => "/sync/ratings",
            Feature::History => "/sync/history",
            Feature::Playlists => unreachable!(),
        };
        let url = format!("{API_BASE}{path}");
        let body = items_to_body(&owned);
        let resp = self
            .http
            .request_with_retries(Method::POST, &url, |b| self.auth(b, token, client_id).json(&body), &RetryConfig::default())
            .await?;
        if resp.status().is_success() {
            result.confirmed_keys.extend(resolvable.iter().map(|i| crosswatch_identity::canonical_key(i)));
        } else {
            let err = crate::http::status_to_error(resp).await;
            for item in &resolvable {
                result.unresolved.push(Unresolved {
                    key: crosswatch_identity::canonical_key(item),
                    reason: err.reason().to_string(),
                    hint: err.hint(),
                });
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
        if matches!(feature, Feature::Playlists) {
            return Ok(RemoveResult::read_only());
        }
        let token = require_str(cfg, "access_token")?;
        let client_id = require_str(cfg, "client_id")?;
        let mut result = RemoveResult::empty();
        result.count = items.len();

        let resolvable: Vec<&Item> = items
            .iter()
            .filter(|i| ID_KEYS.iter().any(|k| i.ids.contains_key(*k)))
            .collect();
        for item in items {
            if !ID_KEYS.iter().any(|k| item.ids.contains_key(*k)) {
                result.unresolved.push(Unresolved {
                    key: crosswatch_identity::canonical_key(item),
                    reason: "missing_ids".to_string(),
                    hint: None,
                });
            }
        }
        if dry_run {
            result.confirmed_keys.extend(resolvable.iter().map(|i| crosswatch_identity::canonical_key(i)));
            return Ok(result);
        }
        if resolvable.is_empty() {
            return Ok(result);
        }

        let owned: Vec<Item> = resolvable.iter().map(|i| (*i).clone()).collect();
        let path = match feature {
            Feature::Watchlist => "/sync/watchlist/remove",
            Feature::Ratings | Feature::History => "/sync/history/remove",
            Feature::Playlists => unreachable!(),
        };
        let url = format!("{API_BASE}{path}");
        let body = items_to_body(&owned);
        let resp = self
            .http
            .request_with_retries(Method::POST, &url, |b| self.auth(b, token, client_id).json(&body), &RetryConfig::default())
            .await?;
        if resp.status().is_success() || resp.status().as_u16() == 404 {
            result.confirmed_keys.extend(resolvable.iter().map(|i| crosswatch_identity::canonical_key(i)));
        } else {
            let err = crate::http::status_to_error(resp).await;
            for item in &resolvable {
                result.unresolved.push(Unresolved {
                    key: crosswatch_identity::canonical_key(item),
                    reason: err.reason().to_string(),
                    hint: err.hint(),
                });
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simkl_ids_payload_drops_unrecognized_kinds() {
        let mut item = Item::new(ItemType::Movie);
        item.ids.insert("imdb".to_string(), "tt0111161".to_string());
        item.ids.insert("trakt".to_string(), "123".to_string());
        item.ids.insert("anilist".to_string(), "456".to_string());
        let payload = simkl_ids_payload(&item);
        assert!(payload.contains_key("imdb"));
        assert!(!payload.contains_key("trakt"));
        assert!(!payload.contains_key("anilist"));
    }

    #[test]
    fn items_to_body_splits_movies_and_shows() {
        let movie = Item::new(ItemType::Movie);
        let show = Item::new(ItemType::Show);
        let body = items_to_body(&[movie, show]);
        assert_eq!(body["movies"].as_array().unwrap().len(), 1);
        assert_eq!(body["shows"].as_array().unwrap().len(), 1);
    }
}
