//! Tautulli adapter: history only, strictly read-only. Tautulli reports
//! play history against a Plex server it monitors but exposes no write
//! surface CrossWatch could target, so `add`/`remove` always fail and
//! `capabilities.can_target` is `false`.
//!
//! Episode rows often arrive without external ids (Tautulli's history API
//! reports `rating_key` and little else); those get enriched with a cached
//! `get_metadata` lookup keyed by `rating_key`.
//!
//! Ground truth: spec.md §4.3.x ("Tautulli") and
//! `examples/original_source/providers/sync/tautulli/_history.py`.

use std::collections::{HashMap, HashSet};
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
    RemoveResult,
};
use crate::traits::{ConfigView, ProviderAdapter, ProviderIndex};

#[derive(Debug, Deserialize)]
struct TautulliEnvelope<T> {
    response: TautulliResponse<T>,
}

#[derive(Debug, Deserialize)]
struct TautulliResponse<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct HistoryData {
    #[serde(default)]
    data: Vec<HistoryRow>,
}

#[derive(Debug, Clone, Deserialize)]
struct HistoryRow {
    rating_key: String,
    #[serde(default)]
    grandparent_rating_key: Option<String>,
    title: Option<String>,
    year: Option<i32>,
    media_type: Option<String>,
    date: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct MetadataData {
    #[serde(default)]
    guids: Vec<String>,
}

fn media_type_to_item_type(kind: Option<&str>) -> ItemType {
    match kind {
        Some("show") => ItemType::Show,
        Some("season") => ItemType::Season,
        Some("episode") => ItemType::Episode,
        _ => ItemType::Movie,
    }
}

fn history_row_to_item(row: &HistoryRow) -> Item {
    let mut item = Item::new(media_type_to_item_type(row.media_type.as_deref()));
    item.title = row.title.clone();
    item.year = row.year;
    item.ids.insert("plex".to_string(), row.rating_key.clone());
    if let Some(parent) = &row.grandparent_rating_key {
        item.show_ids.insert("plex".to_string(), parent.clone());
    }
    if let Some(ts) = row.date {
        item.watched_at = chrono::DateTime::from_timestamp(ts, 0).map(|dt| dt.to_rfc3339());
    }
    item
}

pub struct TautulliAdapter {
    http: HttpClient,
    metadata_cache: Mutex<HashMap<String, Vec<String>>>,
}

impl Default for TautulliAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl TautulliAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self { http: HttpClient::new(), metadata_cache: Mutex::new(HashMap::new()) }
    }

    async fn enrich_with_guids(&self, server: &str, api_key: &str, item: &mut Item, rating_key: &str) {
        let cached = self.metadata_cache.lock().ok().and_then(|c| c.get(rating_key).cloned());
        let guids = if let Some(cached) = cached {
            cached
        } else {
            let url = format!("{server}/api/v2?apikey={api_key}&cmd=get_metadata&rating_key={rating_key}");
            let Ok(resp) = self.http.request_with_retries(Method::GET, &url, |b| b, &RetryConfig::default()).await else {
                return;
            };
            if !resp.status().is_success() {
                return;
            }
            let Ok(parsed) = resp.json::<TautulliEnvelope<MetadataData>>().await else { return };
            if let Ok(mut cache) = self.metadata_cache.lock() {
                cache.insert(rating_key.to_string(), parsed.response.data.guids.clone());
            }
            parsed.response.data.guids
        };
        for guid in &guids {
            for (k, v) in crosswatch_identity::ids_from_guid(Some(guid)) {
                item.ids.entry(k).or_insert(v);
            }
        }
    }
}

#[async_trait]
impl ProviderAdapter for TautulliAdapter {
    fn manifest(&self) -> Manifest {
        Manifest {
            name: "tautulli",
            label: "Tautulli",
            version: "1.0.0",
            kind: "sync",
            bidirectional: false,
            features: vec![Feature::History],
            requires: vec!["server", "api_key"],
            capabilities: Capabilities {
                ratings: None,
                index_semantics: IndexSemantics::Present,
                observed_deletes: false,
                can_target: false,
            },
        }
    }

    fn is_configured(&self, cfg: &ConfigView) -> bool {
        require_str(cfg, "server").is_ok() && require_str(cfg, "api_key").is_ok()
    }

    async fn health(&self, cfg: &ConfigView) -> HealthReport {
        let (Ok(server), Ok(api_key)) = (require_str(cfg, "server"), require_str(cfg, "api_key")) else {
            return HealthReport::not_configured();
        };
        let start = std::time::Instant::now();
        let url = format!("{server}/api/v2?apikey={api_key}&cmd=get_history&length=1");
        match self.http.send_once(Method::GET, &url, |b| b, std::time::Duration::from_secs(8)).await {
            Ok(resp) if resp.status().is_success() => HealthReport {
                ok: true,
                status: "ok".to_string(),
                latency_ms: start.elapsed().as_millis() as u64,
                features: HashMap::from([("history".to_string(), true)]),
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
        if feature != Feature::History {
            return Ok(ProviderIndex::new());
        }
        let server = require_str(cfg, "server")?;
        let api_key = require_str(cfg, "api_key")?;
        let url = format!("{server}/api/v2?apikey={api_key}&cmd=get_history&length=1000");
        let resp = self.http.request_with_retries(Method::GET, &url, |b| b, &RetryConfig::default()).await?;
        if !resp.status().is_success() {
            return Err(crate::http::status_to_error(resp).await);
        }
        let parsed: TautulliEnvelope<HistoryData> = resp.json().await?;

        let mut index = ProviderIndex::new();
        let mut missing_ids: HashSet<String> = HashSet::new();
        for row in &parsed.response.data.data {
            let item = history_row_to_item(row);
            if item.ids.len() <= 1 {
                missing_ids.insert(row.rating_key.clone());
            }
            let key = crosswatch_identity::canonical_key(&item);
            index.entry(key).or_insert(item);
        }

        for row in &parsed.response.data.data {
            if !missing_ids.contains(&row.rating_key) {
                continue;
            }
            let mut item = history_row_to_item(row);
            self.enrich_with_guids(server, api_key, &mut item, &row.rating_key).await;
            let key = crosswatch_identity::canonical_key(&item);
            index.insert(key, item);
        }
        Ok(index)
    }

    async fn add(
        &self,
        _cfg: &ConfigView,
        _items: &[Item],
        _feature: Feature,
        _dry_run: bool,
    ) -> Result<AddResult, ProviderError> {
        Ok(AddResult::read_only())
    }

    async fn remove(
        &self,
        _cfg: &ConfigView,
        _items: &[Item],
        _feature: Feature,
        _dry_run: bool,
    ) -> Result<RemoveResult, ProviderError> {
        Ok(RemoveResult::read_only())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_row_to_item_carries_watched_at() {
        let row = HistoryRow {
            rating_key: "100".to_string(),
            grandparent_rating_key: Some("50".to_string()),
            title: Some("Pilot".to_string()),
            year: Some(2020),
            media_type: Some("episode".to_string()),
            date: Some(1_700_000_000),
        };
        let item = history_row_to_item(&row);
        assert_eq!(item.item_type, ItemType::Episode);
        assert!(item.watched_at.is_some());
        assert_eq!(item.show_ids.get("plex"), Some(&"50".to_string()));
    }
}
