//! TMDb adapter: v3 API, `api_key` query param plus a `session_id` minted out
//! of band for the write endpoints. Watchlist reads come from
//! `/account/{id}/watchlist/{movies|tv}`; ratings are per-media
//! `POST .../rating` / `DELETE .../rating`. Resolving a bare external id
//! (IMDb/TVDb) to a TMDb id goes through `/find/{id}`, cached per
//! `source:value|want` triple to avoid refetching within one run.
//!
//! Ground truth: spec.md §4.3.x ("TMDb") and
//! `examples/original_source/providers/sync/tmdb/_common.py`,
//! `_ratings.py` and `_watchlist.py`.

use std::collections::HashMap;
use std::sync::Mutex;

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

const API_BASE: &str = "https://api.themoviedb.org/3";

#[derive(Debug, Deserialize)]
struct WatchlistPage {
    #[serde(default)]
    results: Vec<WatchlistRow>,
    #[serde(default)]
    total_pages: u32,
}

#[derive(Debug, Deserialize)]
struct WatchlistRow {
    id: i64,
    title: Option<String>,
    name: Option<String>,
    release_date: Option<String>,
    first_air_date: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FindResponse {
    #[serde(default)]
    movie_results: Vec<FindRow>,
    #[serde(default, rename = "tv_results")]
    tv_results: Vec<FindRow>,
}

#[derive(Debug, Deserialize)]
struct FindRow {
    id: i64,
}

fn year_from_date(date: &Option<String>) -> Option<i32> {
    date.as_ref().and_then(|d| d.get(0..4)).and_then(|y| y.parse().ok())
}

fn watchlist_row_to_item(kind: ItemType, row: WatchlistRow) -> Item {
    let mut item = Item::new(kind);
    item.ids.insert("tmdb".to_string(), row.id.to_string());
    item.title = row.title.or(row.name);
    item.year = year_from_date(&row.release_date).or_else(|| year_from_date(&row.first_air_date));
    item
}

/// Caches `source:value|want → tmdb_id` lookups for the lifetime of one
/// adapter instance; cleared on process restart only.
#[derive(Default)]
struct FindCache {
    entries: Mutex<HashMap<String, Option<i64>>>,
}

impl FindCache {
    fn get(&self, key: &str) -> Option<Option<i64>> {
        self.entries.lock().ok()?.get(key).copied()
    }

    fn set(&self, key: String, value: Option<i64>) {
        if let Ok(mut guard) = self.entries.lock() {
            guard.insert(key, value);
        }
    }
}

pub struct TmdbAdapter {
    http: HttpClient,
    find_cache: FindCache,
}

impl Default for TmdbAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl TmdbAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self { http: HttpClient::new(), find_cache: FindCache::default() }
    }

    async fn resolve_tmdb_id(&self, api_key: &str, item: &Item, want: &str) -> Option<i64> {
        if let Some(v) = item.ids.get("tmdb") {
            if let Ok(n) = v.parse() {
                return Some(n);
            }
        }
        for source in ["imdb", "tvdb"] {
            let Some(value) = item.ids.get(source) else { continue };
            let cache_key = format!("{source}:{value}|{want}");
            if let Some(cached) = self.find_cache.get(&cache_key) {
                if cached.is_some() {
                    return cached;
                }
                continue;
            }
            let external_source = if source == "imdb" { "imdb_id" } else { "tvdb_id" };
            let url = format!("{API_BASE}/find/{value}?api_key={api_key}&external_source={external_source}");
            let resp = self.http.request_with_retries(Method::GET, &url, |b| b, &RetryConfig::default()).await.ok();
            let found = match resp {
                Some(r) if r.status().is_success() => {
                    let parsed: FindResponse = r.json().await.unwrap_or_default();
                    let rows = if want == "tv" { parsed.tv_results } else { parsed.movie_results };
                    rows.first().map(|row| row.id)
                }
                _ => None,
            };
            self.find_cache.set(cache_key, found);
            if found.is_some() {
                return found;
            }
        }
        None
    }
}

#[async_trait]
impl ProviderAdapter for TmdbAdapter {
    fn manifest(&self) -> Manifest {
        Manifest {
            name: "tmdb",
            label: "TMDb",
            version: "1.0.0",
            kind: "sync",
            bidirectional: true,
            features: vec![Feature::Watchlist, Feature::Ratings],
            requires: vec!["api_key", "session_id", "account_id"],
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
        require_str(cfg, "api_key").is_ok() && require_str(cfg, "session_id").is_ok() && require_str(cfg, "account_id").is_ok()
    }

    async fn health(&self, cfg: &ConfigView) -> HealthReport {
        let (Ok(api_key), Ok(session_id), Ok(account_id)) =
            (require_str(cfg, "api_key"), require_str(cfg, "session_id"), require_str(cfg, "account_id"))
        else {
            return HealthReport::not_configured();
        };
        let start = std::time::Instant::now();
        let url = format!("{API_BASE}/account/{account_id}/watchlist/movies?api_key={api_key}&session_id={session_id}&page=1");
        match self.http.send_once(Method::GET, &url, |b| b, std::time::Duration::from_secs(8)).await {
            Ok(resp) if resp.status().is_success() => HealthReport {
                ok: true,
                status: "ok".to_string(),
                latency_ms: start.elapsed().as_millis() as u64,
                features: HashMap::from([("watchlist".to_string(), true), ("ratings".to_string(), true)]),
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
        if matches!(feature, Feature::History | Feature::Playlists) {
            return Ok(ProviderIndex::new());
        }
        let api_key = require_str(cfg, "api_key")?;
        let session_id = require_str(cfg, "session_id")?;
        let account_id = require_str(cfg, "account_id")?;
        let endpoint = if feature == Feature::Ratings { "rated" } else { "watchlist" };

        let mut index = ProviderIndex::new();
        for (kind, media_kind) in [(ItemType::Movie, "movies"), (ItemType::Show, "tv")] {
            let mut page = 1u32;
            loop {
                let url = format!(
                    "{API_BASE}/account/{account_id}/{endpoint}/{media_kind}?api_key={api_key}&session_id={session_id}&page={page}"
                );
                let resp = self.http.request_with_retries(Method::GET, &url, |b| b, &RetryConfig::default()).await?;
                if !resp.status().is_success() {
                    return Err(crate::http::status_to_error(resp).await);
                }
                let parsed: WatchlistPage = resp.json().await?;
                let total_pages = parsed.total_pages.max(1);
                for row in parsed.results {
                    let item = watchlist_row_to_item(kind, row);
                    let key = crosswatch_identity::canonical_key(&item);
                    index.entry(key).or_insert(item);
                }
                if page >= total_pages {
                    break;
                }
                page += 1;
            }
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
        if matches!(feature, Feature::History | Feature::Playlists) {
            return Ok(AddResult::read_only());
        }
        let api_key = require_str(cfg, "api_key")?;
        let session_id = require_str(cfg, "session_id")?;
        let account_id = require_str(cfg, "account_id")?;
        let mut result = AddResult::empty();
        result.count = items.len();

        for item in items {
            let key = crosswatch_identity::canonical_key(item);
            let media_kind = if matches!(item.item_type, ItemType::Movie) { "movie" } else { "tv" };
            let Some(tmdb_id) = self.resolve_tmdb_id(api_key, item, if media_kind == "tv" { "tv" } else { "movie" }).await else {
                result.unresolved.push(Unresolved { key, reason: "missing_ids".to_string(), hint: None });
                continue;
            };
            if dry_run {
                result.confirmed_keys.push(key);
                continue;
            }
            let resp = if feature == Feature::Ratings {
                let Some(rating) = item.rating else {
                    result.unresolved.push(Unresolved { key, reason: "missing_ids".to_string(), hint: None });
                    continue;
                };
                let url = format!("{API_BASE}/{media_kind}/{tmdb_id}/rating?api_key={api_key}&session_id={session_id}");
                let body = serde_json::json!({ "value": rating });
                self.http
                    .request_with_retries(Method::POST, &url, |b| b.json(&body), &RetryConfig::default())
                    .await?
            } else {
                let url = format!("{API_BASE}/account/{account_id}/watchlist?api_key={api_key}&session_id={session_id}");
                let body = serde_json::json!({ "media_type": media_kind, "media_id": tmdb_id, "watchlist": true });
                self.http
                    .request_with_retries(Method::POST, &url, |b| b.json(&body), &RetryConfig::default())
                    .await?
            };
            if resp.status().is_success() {
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
        if matches!(feature, Feature::History | Feature::Playlists) {
            return Ok(RemoveResult::read_only());
        }
        let api_key = require_str(cfg, "api_key")?;
        let session_id = require_str(cfg, "session_id")?;
        let account_id = require_str(cfg, "account_id")?;
        let mut result = RemoveResult::empty();
        result.count = items.len();

        for item in items {
            let key = crosswatch_identity::canonical_key(item);
            let media_kind = if matches!(item.item_type, ItemType::Movie) { "movie" } else { "tv" };
            let Some(tmdb_id) = self.resolve_tmdb_id(api_key, item, if media_kind == "tv" { "tv" } else { "movie" }).await else {
                result.unresolved.push(Unresolved { key, reason: "missing_ids".to_string(), hint: None });
                continue;
            };
            if dry_run {
                result.confirmed_keys.push(key);
                continue;
            }
            let resp = if feature == Feature::Ratings {
                let url = format!("{API_BASE}/{media_kind}/{tmdb_id}/rating?api_key={api_key}&session_id={session_id}");
                self.http.request_with_retries(Method::DELETE, &url, |b| b, &RetryConfig::default()).await?
            } else {
                let url = format!("{API_BASE}/account/{account_id}/watchlist?api_key={api_key}&session_id={session_id}");
                let body = serde_json::json!({ "media_type": media_kind, "media_id": tmdb_id, "watchlist": false });
                self.http
                    .request_with_retries(Method::POST, &url, |b| b.json(&body), &RetryConfig::default())
                    .await?
            };
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn year_from_date_reads_leading_digits() {
        assert_eq!(year_from_date(&Some("1994-09-23".to_string())), Some(1994));
        assert_eq!(year_from_date(&None), None);
    }

    #[test]
    fn find_cache_round_trips() {
        let cache = FindCache::default();
        assert!(cache.get("imdb:tt1|movie").is_none());
        cache.set("imdb:tt1|movie".to_string(), Some(42));
        assert_eq!(cache.get("imdb:tt1|movie"), Some(Some(42)));
    }
}
