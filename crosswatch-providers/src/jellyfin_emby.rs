//! Jellyfin/Emby adapter. Both vendors speak the same Items/Users API
//! surface (Jellyfin forked Emby); one module covers both, parameterized by
//! `kind`.
//!
//! Ground truth: spec.md §4.3.x ("Jellyfin/Emby") and
//! `examples/original_source/providers/sync/jellyfin/_utils.py` for the
//! header/auth shape (`X-Emby-Token`, shared connection pool); the pack has
//! no separate Emby sync module, so Emby is grounded on the same file.

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

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vendor {
    Jellyfin,
    Emby,
}

impl Vendor {
    const fn name(self) -> &'static str {
        match self {
            Self::Jellyfin => "jellyfin",
            Self::Emby => "emby",
        }
    }

    const fn token_header(self) -> &'static str {
        match self {
            Self::Jellyfin => "X-MediaBrowser-Token",
            Self::Emby => "X-Emby-Token",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchlistMode {
    Favorites,
    Playlist,
    Collection,
}

fn watchlist_mode(cfg: &ConfigView) -> WatchlistMode {
    let raw = cfg
        .get("watchlist")
        .and_then(|w| w.get("mode"))
        .and_then(Value::as_str)
        .unwrap_or("favorites");
    match raw {
        "playlist" => WatchlistMode::Playlist,
        "collection" => WatchlistMode::Collection,
        _ => WatchlistMode::Favorites,
    }
}

fn playlist_name(cfg: &ConfigView) -> String {
    cfg.get("watchlist")
        .and_then(|w| w.get("playlist_name"))
        .and_then(Value::as_str)
        .unwrap_or("CrossWatch")
        .to_string()
}

#[derive(Debug, Deserialize)]
struct ItemsResponse {
    #[serde(default, rename = "Items")]
    items: Vec<EmbyItem>,
}

#[derive(Debug, Deserialize)]
struct EmbyItem {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Name")]
    name: Option<String>,
    #[serde(rename = "ProductionYear")]
    year: Option<i32>,
    #[serde(rename = "Type")]
    kind: Option<String>,
    #[serde(default, rename = "ProviderIds")]
    provider_ids: HashMap<String, String>,
}

fn emby_type(kind: Option<&str>) -> ItemType {
    match kind {
        Some("Series") => ItemType::Show,
        Some("Season") => ItemType::Season,
        Some("Episode") => ItemType::Episode,
        _ => ItemType::Movie,
    }
}

fn item_to_item(vendor: Vendor, row: EmbyItem) -> Item {
    let mut item = Item::new(emby_type(row.kind.as_deref()));
    item.title = row.name;
    item.year = row.year;
    item.ids.insert(vendor.name().to_string(), row.id);
    for (k, v) in row.provider_ids {
        if let Some(norm) = crosswatch_identity::normalize(&k.to_ascii_lowercase(), &v) {
            item.ids.entry(k.to_ascii_lowercase()).or_insert(norm);
        }
    }
    item
}

pub struct JellyfinEmbyAdapter {
    vendor: Vendor,
    http: HttpClient,
}

impl JellyfinEmbyAdapter {
    #[must_use]
    pub fn new(vendor: Vendor) -> Self {
        Self { vendor, http: HttpClient::new() }
    }

    fn auth(&self, b: reqwest::RequestBuilder, token: &str) -> reqwest::RequestBuilder {
        b.header(self.vendor.token_header(), token)
    }

    async fn find_playlist_or_collection(
        &self,
        server: &str,
        token: &str,
        user_id: &str,
        name: &str,
        kind: &str,
    ) -> Result<Option<String>, ProviderError> {
        let url = format!("{server}/Users/{user_id}/Items?IncludeItemTypes={kind}&Recursive=true");
        let resp = self
            .http
            .request_with_retries(Method::GET, &url, |b| self.auth(b, token), &RetryConfig::default())
            .await?;
        if !resp.status().is_success() {
            return Err(crate::http::status_to_error(resp).await);
        }
        let parsed: ItemsResponse = resp.json().await?;
        Ok(parsed.items.into_iter().find(|i| i.name.as_deref() == Some(name)).map(|i| i.id))
    }

    async fn resolve_item_id(&self, server: &str, token: &str, item: &Item) -> Option<String> {
        if let Some(id) = item.ids.get(self.vendor.name()) {
            return Some(id.clone());
        }
        for (kind, value) in &item.ids {
            if matches!(kind.as_str(), "imdb" | "tmdb" | "tvdb") {
                let url = format!("{server}/Items?AnyProviderIdEquals={kind}.{value}");
                if let Ok(resp) = self
                    .http
                    .request_with_retries(Method::GET, &url, |b| self.auth(b, token), &RetryConfig::default())
                    .await
                {
                    if resp.status().is_success() {
                        if let Ok(parsed) = resp.json::<ItemsResponse>().await {
                            if let Some(first) = parsed.items.into_iter().next() {
                                return Some(first.id);
                            }
                        }
                    }
                }
            }
        }
        None
    }
}

#[async_trait]
impl ProviderAdapter for JellyfinEmbyAdapter {
    fn manifest(&self) -> Manifest {
        Manifest {
            name: self.vendor.name(),
            label: if self.vendor == Vendor::Jellyfin { "Jellyfin" } else { "Emby" },
            version: "1.0.0",
            kind: "sync",
            bidirectional: true,
            features: vec![Feature::Watchlist],
            requires: vec!["server", "access_token", "user_id"],
            capabilities: Capabilities {
                ratings: None,
                index_semantics: IndexSemantics::Present,
                observed_deletes: true,
                can_target: true,
            },
        }
    }

    fn is_configured(&self, cfg: &ConfigView) -> bool {
        require_str(cfg, "server").is_ok() && require_str(cfg, "access_token").is_ok() && require_str(cfg, "user_id").is_ok()
    }

    async fn health(&self, cfg: &ConfigView) -> HealthReport {
        let (Ok(server), Ok(token), Ok(user_id)) =
            (require_str(cfg, "server"), require_str(cfg, "access_token"), require_str(cfg, "user_id"))
        else {
            return HealthReport::not_configured();
        };
        let start = std::time::Instant::now();
        let url = format!("{server}/System/Ping");
        let result = self.http.send_once(Method::GET, &url, |b| self.auth(b, token), std::time::Duration::from_secs(8)).await;
        let _ = user_id;
        match result {
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
        let server = require_str(cfg, "server")?;
        let token = require_str(cfg, "access_token")?;
        let user_id = require_str(cfg, "user_id")?;

        let url = match watchlist_mode(cfg) {
            WatchlistMode::Favorites => {
                format!("{server}/Users/{user_id}/Items?Filters=IsFavorite&IncludeItemTypes=Movie,Series&Recursive=true")
            }
            WatchlistMode::Playlist => {
                let name = playlist_name(cfg);
                let Some(id) = self.find_playlist_or_collection(server, token, user_id, &name, "Playlist").await? else {
                    return Ok(ProviderIndex::new());
                };
                format!("{server}/Playlists/{id}/Items?UserId={user_id}")
            }
            WatchlistMode::Collection => {
                let name = playlist_name(cfg);
                let Some(id) = self.find_playlist_or_collection(server, token, user_id, &name, "BoxSet").await? else {
                    return Ok(ProviderIndex::new());
                };
                format!("{server}/Users/{user_id}/Items?ParentId={id}")
            }
        };

        let resp = self
            .http
            .request_with_retries(Method::GET, &url, |b| self.auth(b, token), &RetryConfig::default())
            .await?;
        if !resp.status().is_success() {
            return Err(crate::http::status_to_error(resp).await);
        }
        let parsed: ItemsResponse = resp.json().await?;
        let mut index = ProviderIndex::new();
        for row in parsed.items {
            let item = item_to_item(self.vendor, row);
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
        let server = require_str(cfg, "server")?;
        let token = require_str(cfg, "access_token")?;
        let user_id = require_str(cfg, "user_id")?;
        let mode = watchlist_mode(cfg);

        let target_id = match mode {
            WatchlistMode::Favorites => None,
            WatchlistMode::Playlist => {
                let name = playlist_name(cfg);
                self.find_playlist_or_collection(server, token, user_id, &name, "Playlist").await?
            }
            WatchlistMode::Collection => {
                let name = playlist_name(cfg);
                self.find_playlist_or_collection(server, token, user_id, &name, "BoxSet").await?
            }
        };

        let mut result = AddResult::empty();
        result.count = items.len();
        for item in items {
            let key = crosswatch_identity::canonical_key(item);
            let Some(item_id) = self.resolve_item_id(server, token, item).await else {
                result.unresolved.push(Unresolved { key, reason: "missing_ids".to_string(), hint: None });
                continue;
            };
            if dry_run {
                result.confirmed_keys.push(key);
                continue;
            }
            let url = match mode {
                WatchlistMode::Favorites => format!("{server}/Users/{user_id}/FavoriteItems/{item_id}"),
                WatchlistMode::Playlist => {
                    let Some(pid) = &target_id else {
                        result.unresolved.push(Unresolved { key, reason: "not_found".to_string(), hint: None });
                        continue;
                    };
                    format!("{server}/Playlists/{pid}/Items?Ids={item_id}&UserId={user_id}")
                }
                WatchlistMode::Collection => {
                    let Some(cid) = &target_id else {
                        result.unresolved.push(Unresolved { key, reason: "not_found".to_string(), hint: None });
                        continue;
                    };
                    format!("{server}/Collections/{cid}/Items?Ids={item_id}")
                }
            };
            let resp = self
                .http
                .request_with_retries(Method::POST, &url, |b| self.auth(b, token), &RetryConfig::default())
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
            return Ok(RemoveResult::read_only());
        }
        let server = require_str(cfg, "server")?;
        let token = require_str(cfg, "access_token")?;
        let user_id = require_str(cfg, "user_id")?;
        let mode = watchlist_mode(cfg);

        let target_id = match mode {
            WatchlistMode::Favorites => None,
            WatchlistMode::Playlist => {
                let name = playlist_name(cfg);
                self.find_playlist_or_collection(server, token, user_id, &name, "Playlist").await?
            }
            WatchlistMode::Collection => {
                let name = playlist_name(cfg);
                self.find_playlist_or_collection(server, token, user_id, &name, "BoxSet").await?
            }
        };

        let mut result = RemoveResult::empty();
        result.count = items.len();
        for item in items {
            let key = crosswatch_identity::canonical_key(item);
            let Some(item_id) = self.resolve_item_id(server, token, item).await else {
                result.unresolved.push(Unresolved { key, reason: "missing_ids".to_string(), hint: None });
                continue;
            };
            if dry_run {
                result.confirmed_keys.push(key);
                continue;
            }
            let url = match mode {
                WatchlistMode::Favorites => format!("{server}/Users/{user_id}/FavoriteItems/{item_id}"),
                WatchlistMode::Playlist => {
                    let Some(pid) = &target_id else {
                        result.confirmed_keys.push(key);
                        continue;
                    };
                    format!("{server}/Playlists/{pid}/Items?EntryIds={item_id}")
                }
                WatchlistMode::Collection => {
                    let Some(cid) = &target_id else {
                        result.confirmed_keys.push(key);
                        continue;
                    };
                    format!("{server}/Collections/{cid}/Items?Ids={item_id}")
                }
            };
            let resp = self
                .http
                .request_with_retries(Method::DELETE, &url, |b| self.auth(b, token), &RetryConfig::default())
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_mode_is_favorites() {
        let cfg = ConfigView::new();
        assert_eq!(watchlist_mode(&cfg), WatchlistMode::Favorites);
    }

    #[test]
    fn playlist_name_falls_back_to_default() {
        let cfg = ConfigView::new();
        assert_eq!(playlist_name(&cfg), "CrossWatch");
    }

    #[test]
    fn item_to_item_carries_provider_ids() {
        let mut provider_ids = HashMap::new();
        provider_ids.insert("Imdb".to_string(), "tt0111161".to_string());
        let row = EmbyItem { id: "42".to_string(), name: Some("x".into()), year: Some(1994), kind: Some("Movie".into()), provider_ids };
        let item = item_to_item(Vendor::Emby, row);
        assert_eq!(item.ids.get("emby"), Some(&"42".to_string()));
        assert_eq!(item.ids.get("imdb"), Some(&"tt0111161".to_string()));
    }
}
