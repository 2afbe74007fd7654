//! MDBList adapter: a single user watchlist, written and read in batches.
//! Items MDBList can't resolve come back tagged `not-found` in the response
//! body rather than as an HTTP failure; those freeze into a shadow entry so
//! the Reconciler doesn't retry them indefinitely.
//!
//! Ground truth: spec.md §4.3.x ("MDBList") and
//! `examples/original_source/providers/sync/mdblist/_common.py`,
//! `_ratings.py` and `_watchlist.py`.

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
    RemoveResult, Unresolved,
};
use crate::traits::{ConfigView, ProviderAdapter, ProviderIndex};

const API_BASE: &str = "https://mdblist.com/api";

#[derive(Debug, Deserialize)]
struct WatchlistItem {
    #[serde(default)]
    imdb_id: Option<String>,
    #[serde(default)]
    tmdb_id: Option<serde_json::Number>,
    #[serde(default)]
    tvdb_id: Option<serde_json::Number>,
    title: Option<String>,
    #[serde(default)]
    release_year: Option<i32>,
    #[serde(default)]
    mediatype: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct BatchResponse {
    #[serde(default)]
    added: BatchCounts,
    #[serde(default)]
    existing: BatchCounts,
    #[serde(default)]
    not_found: Vec<BatchRef>,
}

#[derive(Debug, Default, Deserialize)]
struct BatchCounts {
    #[serde(default)]
    movies: u32,
    #[serde(default)]
    shows: u32,
}

#[derive(Debug, Deserialize)]
struct BatchRef {
    #[serde(default)]
    imdb_id: Option<String>,
    #[serde(default)]
    tmdb_id: Option<serde_json::Number>,
}

fn mediatype_to_item_type(kind: Option<&str>) -> ItemType {
    match kind {
        Some("show") => ItemType::Show,
        _ => ItemType::Movie,
    }
}

fn watchlist_item_to_item(row: WatchlistItem) -> Item {
    let mut item = Item::new(mediatype_to_item_type(row.mediatype.as_deref()));
    item.title = row.title;
    item.year = row.release_year;
    if let Some(v) = &row.imdb_id {
        if let Some(n) = crosswatch_identity::normalize("imdb", v) {
            item.ids.insert("imdb".to_string(), n);
        }
    }
    if let Some(v) = &row.tmdb_id {
        if let Some(n) = crosswatch_identity::normalize("tmdb", &v.to_string()) {
            item.ids.insert("tmdb".to_string(), n);
        }
    }
    if let Some(v) = &row.tvdb_id {
        if let Some(n) = crosswatch_identity::normalize("tvdb", &v.to_string()) {
            item.ids.insert("tvdb".to_string(), n);
        }
    }
    item
}

fn items_to_batch(items: &[Item]) -> Value {
    let mut movies = Vec::new();
    let mut shows = Vec::new();
    for item in items {
        let mut entry = serde_json::Map::new();
        if let Some(v) = item.ids.get("imdb") {
            entry.insert("imdb_id".to_string(), Value::from(v.as_str()));
        }
        if let Some(v) = item.ids.get("tmdb") {
            if let Ok(n) = v.parse::<i64>() {
                entry.insert("tmdb_id".to_string(), Value::from(n));
            }
        }
        if let Some(v) = item.ids.get("tvdb") {
            if let Ok(n) = v.parse::<i64>() {
                entry.insert("tvdb_id".to_string(), Value::from(n));
            }
        }
        match item.item_type {
            ItemType::Movie => movies.push(Value::Object(entry)),
            _ => shows.push(Value::Object(entry)),
        }
    }
    serde_json::json!({ "movies": movies, "shows": shows })
}

pub struct MdblistAdapter {
    http: HttpClient,
}

impl Default for MdblistAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MdblistAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self { http: HttpClient::new() }
    }
}

#[async_trait]
impl ProviderAdapter for MdblistAdapter {
    fn manifest(&self) -> Manifest {
        Manifest {
            name: "mdblist",
            label: "MDBList",
            version: "1.0.0",
            kind: "sync",
            bidirectional: true,
            features: vec![Feature::Watchlist],
            requires: vec!["api_key"],
            capabilities: Capabilities {
                ratings: None,
                index_semantics: IndexSemantics::Present,
                observed_deletes: true,
                can_target: true,
            },
        }
    }

    fn is_configured(&self, cfg: &ConfigView) -> bool {
        require_str(cfg, "api_key").is_ok()
    }

    async fn health(&self, cfg: &ConfigView) -> HealthReport {
        let Ok(key) = require_str(cfg, "api_key") else {
            return HealthReport::not_configured();
        };
        let start = std::time::Instant::now();
        let url = format!("{API_BASE}/watchlist/items?apikey={key}");
        match self.http.send_once(Method::GET, &url, |b| b, std::time::Duration::from_secs(8)).await {
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
        if feature != Feature::Watchlist {
            return Ok(ProviderIndex::new());
        }
        let key = require_str(cfg, "api_key")?;
        let url = format!("{API_BASE}/watchlist/items?apikey={key}");
        let resp = self.http.request_with_retries(Method::GET, &url, |b| b, &RetryConfig::default()).await?;
        if !resp.status().is_success() {
            return Err(crate::http::status_to_error(resp).await);
        }
        let rows: Vec<WatchlistItem> = resp.json().await?;
        let mut index = ProviderIndex::new();
        for row in rows {
            let item = watchlist_item_to_item(row);
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
        if feature != Feature::Watchlist {
            return Ok(AddResult::read_only());
        }
        let key = require_str(cfg, "api_key")?;
        let mut result = AddResult::empty();
        result.count = items.len();

        let resolvable: Vec<&Item> =
            items.iter().filter(|i| i.ids.contains_key("imdb") || i.ids.contains_key("tmdb")).collect();
        for item in items {
            if !item.ids.contains_key("imdb") && !item.ids.contains_key("tmdb") {
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
        let body = items_to_batch(&owned);
        let url = format!("{API_BASE}/watchlist/items/add?apikey={key}");
        let resp = self.http.request_with_retries(Method::POST, &url, |b| b.json(&body), &RetryConfig::default()).await?;
        if !resp.status().is_success() {
            let err = crate::http::status_to_error(resp).await;
            for item in &resolvable {
                result.unresolved.push(Unresolved {
                    key: crosswatch_identity::canonical_key(item),
                    reason: err.reason().to_string(),
                    hint: err.hint(),
                });
            }
            return Ok(result);
        }
        let parsed: BatchResponse = resp.json().await.unwrap_or_default();
        let not_found_imdb: std::collections::HashSet<String> =
            parsed.not_found.iter().filter_map(|r| r.imdb_id.clone()).collect();
        for item in &resolvable {
            let key = crosswatch_identity::canonical_key(item);
            let is_not_found = item.ids.get("imdb").is_some_and(|v| not_found_imdb.contains(v));
            if is_not_found {
                result.unresolved.push(Unresolved { key, reason: "not_found".to_string(), hint: Some("not-found".to_string()) });
            } else {
                result.confirmed_keys.push(key);
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
            return Ok(RemoveResult::read_only());
        }
        let key = require_str(cfg, "api_key")?;
        let mut result = RemoveResult::empty();
        result.count = items.len();

        let resolvable: Vec<&Item> =
            items.iter().filter(|i| i.ids.contains_key("imdb") || i.ids.contains_key("tmdb")).collect();
        for item in items {
            if !item.ids.contains_key("imdb") && !item.ids.contains_key("tmdb") {
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
        let body = items_to_batch(&owned);
        let url = format!("{API_BASE}/watchlist/items/remove?apikey={key}");
        let resp = self.http.request_with_retries(Method::POST, &url, |b| b.json(&body), &RetryConfig::default()).await?;
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
    fn watchlist_item_to_item_picks_up_imdb_and_tmdb() {
        let row = WatchlistItem {
            imdb_id: Some("tt0111161".to_string()),
            tmdb_id: Some(serde_json::Number::from(278)),
            tvdb_id: None,
            title: Some("The Shawshank Redemption".to_string()),
            release_year: Some(1994),
            mediatype: Some("movie".to_string()),
        };
        let item = watchlist_item_to_item(row);
        assert_eq!(item.ids.get("imdb"), Some(&"tt0111161".to_string()));
        assert_eq!(item.ids.get("tmdb"), Some(&"278".to_string()));
        assert_eq!(item.item_type, ItemType::Movie);
    }

    #[test]
    fn items_to_batch_splits_by_type() {
        let mut movie = Item::new(ItemType::Movie);
        movie.ids.insert("imdb".to_string(), "tt1".to_string());
        let body = items_to_batch(&[movie]);
        assert_eq!(body["movies"].as_array().unwrap().len(), 1);
        assert_eq!(body["shows"].as_array().unwrap().len(), 0);
    }
}
