//! Trakt adapter: `/sync/watchlist`, `/sync/ratings`, and `/sync/history`
//! over OAuth bearer tokens. Device-code auth is referenced by config
//! (`access_token` is assumed already minted) but never performed here.
//!
//! Ground truth: spec.md §4.3.x ("Trakt"). The example pack's
//! `original_source/` has no Trakt sync module to ground against; this
//! adapter follows the shared request/retry shape used throughout
//! `original_source/providers/sync/_mod_common.py` instead.

use std::collections::HashMap;

use async_trait::async_trait;
use crosswatch_identity::{Item, ItemType};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cfgutil::require_str;
use crate::error::ProviderError;
use crate::http::{HttpClient, RetryConfig};
use crate::manifest::{
    AddResult, Capabilities, Feature, HealthDetails, HealthReport, IndexSemantics, Manifest,
    RatingsCapability, RatingsTypes, RemoveResult, Unresolved,
};
use crate::traits::{ConfigView, ProviderAdapter, ProviderIndex};

const API_BASE: &str = "https://api.trakt.tv";

#[derive(Debug, Default, Deserialize, Serialize)]
struct TraktIds {
    #[serde(skip_serializing_if = "Option::is_none")]
    trakt: Option<serde_json::Number>,
    #[serde(skip_serializing_if = "Option::is_none")]
    slug: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    imdb: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tmdb: Option<serde_json::Number>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tvdb: Option<serde_json::Number>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct TraktMedia {
    title: Option<String>,
    year: Option<i32>,
    ids: TraktIds,
}

#[derive(Debug, Deserialize)]
struct WatchlistEntry {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    movie: Option<TraktMedia>,
    #[serde(default)]
    show: Option<TraktMedia>,
    #[serde(default)]
    season: Option<TraktMedia>,
    #[serde(default)]
    episode: Option<TraktMedia>,
}

#[derive(Debug, Deserialize)]
struct RatingEntry {
    rating: u8,
    rated_at: Option<String>,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    movie: Option<TraktMedia>,
    #[serde(default)]
    show: Option<TraktMedia>,
    #[serde(default)]
    season: Option<TraktMedia>,
    #[serde(default)]
    episode: Option<TraktMedia>,
}

fn media_kind(kind: &str) -> ItemType {
    match kind {
        "show" => ItemType::Show,
        "season" => ItemType::Season,
        "episode" => ItemType::Episode,
        _ => ItemType::Movie,
    }
}

fn media_to_item(kind: &str, media: &TraktMedia) -> Item {
    let mut item = Item::new(media_kind(kind));
    item.title = media.title.clone();
    item.year = media.year;
    if let Some(v) = &media.ids.trakt {
        if let Some(n) = crosswatch_identity::normalize("trakt", &v.to_string()) {
            item.ids.insert("trakt".to_string(), n);
        }
    }
    if let Some(v) = &media.ids.slug {
        if let Some(n) = crosswatch_identity::normalize("slug", v) {
            item.ids.insert("slug".to_string(), n);
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
    item
}

fn media_for(entry: &WatchlistEntry) -> Option<(&str, &TraktMedia)> {
    match entry.kind.as_str() {
        "movie" => entry.movie.as_ref().map(|m| ("movie", m)),
        "show" => entry.show.as_ref().map(|m| ("show", m)),
        "season" => entry.season.as_ref().map(|m| ("season", m)),
        "episode" => entry.episode.as_ref().map(|m| ("episode", m)),
        _ => None,
    }
}

fn media_for_rating(entry: &RatingEntry) -> Option<(&str, &TraktMedia)> {
    match entry.kind.as_str() {
        "movie" => entry.movie.as_ref().map(|m| ("movie", m)),
        "show" => entry.show.as_ref().map(|m| ("show", m)),
        "season" => entry.season.as_ref().map(|m| ("season", m)),
        "episode" => entry.episode.as_ref().map(|m| ("episode", m)),
        _ => None,
    }
}

/// Builds the `{movies:[...], shows:[...], ...}` body Trakt's sync endpoints
/// expect, bucketing each item by its canonical `type` and projecting only
/// the ids it carries.
fn items_to_sync_body(items: &[Item]) -> serde_json::Map<String, Value> {
    let mut buckets: HashMap<&'static str, Vec<Value>> = HashMap::new();
    for item in items {
        let bucket = match item.item_type {
            ItemType::Movie => "movies",
            ItemType::Show | ItemType::Anime => "shows",
            ItemType::Season => "seasons",
            ItemType::Episode => "episodes",
        };
        let mut ids = serde_json::Map::new();
        for k in ["trakt", "slug", "imdb", "tmdb", "tvdb"] {
            if let Some(v) = item.ids.get(k) {
                if matches!(k, "trakt" | "tmdb" | "tvdb") {
                    if let Ok(n) = v.parse::<i64>() {
                        ids.insert(k.to_string(), Value::from(n));
                        continue;
                    }
                }
                ids.insert(k.to_string(), Value::from(v.as_str()));
            }
        }
        buckets.entry(bucket).or_default().push(serde_json::json!({ "ids": ids }));
    }
    buckets.into_iter().map(|(k, v)| (k.to_string(), Value::Array(v))).collect()
}

pub struct TraktAdapter {
    http: HttpClient,
}

impl Default for TraktAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl TraktAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self { http: HttpClient::new() }
    }

    fn auth(
        &self,
        b: reqwest::RequestBuilder,
        token: &str,
        client_id: &str,
    ) -> reqwest::RequestBuilder {
        b.bearer_auth(token)
            .header("trakt-api-version", "2")
            .header("trakt-api-key", client_id)
    }
}

#[async_trait]
impl ProviderAdapter for TraktAdapter {
    fn manifest(&self) -> Manifest {
        Manifest {
            name: "trakt",
            label: "Trakt",
            version: "1.0.0",
            kind: "sync",
            bidirectional: true,
            features: vec![Feature::Watchlist, Feature::Ratings, Feature::History],
            requires: vec!["access_token", "client_id"],
            capabilities: Capabilities {
                ratings: Some(RatingsCapability {
                    types: RatingsTypes { movies: true, shows: true, seasons: true, episodes: true },
                    upsert: true,
                    unrate: true,
                    from_date: true,
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
        let url = format!("{API_BASE}/sync/last_activities");
        match self
            .http
            .send_once(Method::GET, &url, |b| self.auth(b, token, client_id), std::time::Duration::from_secs(8))
            .await
        {
            Ok(resp) if resp.status().is_success() => HealthReport {
                ok: true,
                status: "ok".to_string(),
                latency_ms: start.elapsed().as_millis() as u64,
                features: HashMap::from([
                    ("watchlist".to_string(), true),
                    ("ratings".to_string(), true),
                    ("history".to_string(), true),
                ]),
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

        match feature {
            Feature::Watchlist => {
                let url = format!("{API_BASE}/sync/watchlist");
                let resp = self
                    .http
                    .request_with_retries(Method::GET, &url, |b| self.auth(b, token, client_id), &RetryConfig::default())
                    .await?;
                if !resp.status().is_success() {
                    return Err(crate::http::status_to_error(resp).await);
                }
                let entries: Vec<WatchlistEntry> = resp.json().await?;
                for entry in &entries {
                    if let Some((kind, media)) = media_for(entry) {
                        let item = media_to_item(kind, media);
                        let key = crosswatch_identity::canonical_key(&item);
                        index.entry(key).or_insert(item);
                    }
                }
            }
            Feature::Ratings => {
                let url = format!("{API_BASE}/sync/ratings");
                let resp = self
                    .http
                    .request_with_retries(Method::GET, &url, |b| self.auth(b, token, client_id), &RetryConfig::default())
                    .await?;
                if !resp.status().is_success() {
                    return Err(crate::http::status_to_error(resp).await);
                }
                let entries: Vec<RatingEntry> = resp.json().await?;
                for entry in &entries {
                    if let Some((kind, media)) = media_for_rating(entry) {
                        let mut item = media_to_item(kind, media);
                        item.rating = Some(entry.rating);
                        item.rated_at = entry.rated_at.clone();
                        let key = crosswatch_identity::canonical_key(&item);
                        index.entry(key).or_insert(item);
                    }
                }
            }
            Feature::History => {
                let url = format!("{API_BASE}/sync/history");
                let resp = self
                    .http
                    .request_with_retries(Method::GET, &url, |b| self.auth(b, token, client_id), &RetryConfig::default())
                    .await?;
                if !resp.status().is_success() {
                    return Err(crate::http::status_to_error(resp).await);
                }
                let entries: Vec<WatchlistEntry> = resp.json().await?;
                for entry in &entries {
                    if let Some((kind, media)) = media_for(entry) {
                        let item = media_to_item(kind, media);
                        let key = crosswatch_identity::canonical_key(&item);
                        index.entry(key).or_insert(item);
                    }
                }
            }
            Feature::Playlists => {}
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

        let resolvable: Vec<&Item> = items.iter().filter(|i| !i.ids.is_empty()).collect();
        for item in items {
            if item.ids.is_empty() {
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

        let path = match feature {
            Feature::Watchlist => "/sync/watchlist",
            Feature::Ratings => "/sync/ratings",
            Feature::History => "/sync/history",
            Feature::Playlists => unreachable!(),
        };
        let owned: Vec<Item> = resolvable.iter().map(|i| (*i).clone()).collect();
        let mut body = items_to_sync_body(&owned);
        if feature == Feature::Ratings {
            for (_, bucket) in body.iter_mut() {
                if let Value::Array(arr) = bucket {
                    for (entry, item) in arr.iter_mut().zip(&owned) {
                        if let (Value::Object(obj), Some(rating)) = (entry, item.rating) {
                            obj.insert("rating".to_string(), Value::from(rating as u64));
                        }
                    }
                }
            }
        }

        let url = format!("{API_BASE}{path}");
        let body_value = Value::Object(body);
        let resp = self
            .http
            .request_with_retries(Method::POST, &url, |b| self.auth(b, token, client_id).json(&body_value), &RetryConfig::default())
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

        let resolvable: Vec<&Item> = items.iter().filter(|i| !i.ids.is_empty()).collect();
        for item in items {
            if item.ids.is_empty() {
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

        let path = match feature {
            Feature::Watchlist => "/sync/watchlist/remove",
            Feature::Ratings => "/sync/ratings/remove",
            Feature::History => "/sync/history/remove",
            Feature::Playlists => unreachable!(),
        };
        let owned: Vec<Item> = resolvable.iter().map(|i| (*i).clone()).collect();
        let body = Value::Object(items_to_sync_body(&owned));
        let url = format!("{API_BASE}{path}");
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
    fn media_to_item_normalizes_numeric_ids() {
        let media = TraktMedia {
            title: Some("Inception".to_string()),
            year: Some(2010),
            ids: TraktIds { tmdb: Some(serde_json::Number::from(27205)), ..Default::default() },
        };
        let item = media_to_item("movie", &media);
        assert_eq!(item.ids.get("tmdb"), Some(&"27205".to_string()));
    }

    #[test]
    fn items_to_sync_body_buckets_by_type() {
        let mut movie = Item::new(ItemType::Movie);
        movie.ids.insert("tmdb".to_string(), "27205".to_string());
        let mut show = Item::new(ItemType::Show);
        show.ids.insert("tvdb".to_string(), "121361".to_string());
        let body = items_to_sync_body(&[movie, show]);
        assert!(body.contains_key("movies"));
        assert!(body.contains_key("shows"));
    }
}
