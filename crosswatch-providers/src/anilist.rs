//! AniList adapter: GraphQL only, no REST surface. `PLANNING` status maps to
//! the watchlist feature; identity is AniList's own media id with a MAL
//! fallback, resolved from title/year/format by a scored match since
//! AniList never speaks IMDb/TMDb/TVDb ids.
//!
//! Scoring (spec.md §4.3.x "AniList"): exact normalized-title match +70,
//! substring match ±20; year equal +30, year differs -50; matching
//! kind/format +5. A candidate is accepted at score >= 85. The per-entry
//! shadow (`source_key -> {anilist_id, list_entry_id}`) is threaded through
//! `Item::provider_data` so the Reconciler can persist it across runs.
//!
//! Ground truth: spec.md §4.3.x ("AniList") and
//! `examples/original_source/providers/sync/anilist/_common.py` and
//! `_watchlist.py`.

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

const API_BASE: &str = "https://graphql.anilist.co";
const MATCH_THRESHOLD: i32 = 85;

#[derive(Debug, Deserialize)]
struct MediaListEntry {
    id: i64,
    status: String,
    media: MediaRef,
}

#[derive(Debug, Deserialize)]
struct MediaRef {
    id: i64,
    #[serde(rename = "idMal")]
    id_mal: Option<i64>,
    title: MediaTitle,
    #[serde(rename = "seasonYear")]
    season_year: Option<i32>,
    format: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MediaTitle {
    romaji: Option<String>,
    english: Option<String>,
}

fn normalize_title(s: &str) -> String {
    s.chars().filter(|c| c.is_alphanumeric()).flat_map(char::to_lowercase).collect()
}

fn media_format_to_item_type(format: Option<&str>) -> ItemType {
    match format {
        Some("MOVIE") => ItemType::Movie,
        _ => ItemType::Anime,
    }
}

fn media_ref_to_item(list_id: i64, media: &MediaRef) -> Item {
    let mut item = Item::new(media_format_to_item_type(media.format.as_deref()));
    item.title = media.title.english.clone().or_else(|| media.title.romaji.clone());
    item.year = media.season_year;
    item.ids.insert("anilist".to_string(), media.id.to_string());
    if let Some(mal) = media.id_mal {
        item.ids.insert("mal".to_string(), mal.to_string());
    }
    item.provider_data.insert("list_entry_id".to_string(), Value::from(list_id));
    item
}

/// Scores how well `candidate` matches `target` on title/year/format.
/// Exposed for the grounding tests; the adapter only uses it through
/// `best_match`.
fn score_candidate(target: &Item, candidate: &MediaRef) -> i32 {
    let mut score = 0;
    let target_title = target.title.as_deref().map(normalize_title).unwrap_or_default();
    let candidate_titles: Vec<String> = [&candidate.title.english, &candidate.title.romaji]
        .into_iter()
        .flatten()
        .map(|t| normalize_title(t))
        .collect();

    let title_score = candidate_titles
        .iter()
        .map(|c| {
            if *c == target_title {
                70
            } else if c.contains(&target_title) || target_title.contains(c.as_str()) {
                20
            } else {
                0
            }
        })
        .max()
        .unwrap_or(0);
    score += title_score;

    match (target.year, candidate.season_year) {
        (Some(a), Some(b)) if a == b => score += 30,
        (Some(_), Some(_)) => score -= 50,
        _ => {}
    }

    let target_is_movie = matches!(target.item_type, ItemType::Movie);
    let candidate_is_movie = candidate.format.as_deref() == Some("MOVIE");
    if target_is_movie == candidate_is_movie {
        score += 5;
    }

    score
}

fn best_match<'a>(target: &Item, candidates: &'a [MediaRef]) -> Option<&'a MediaRef> {
    candidates
        .iter()
        .map(|c| (score_candidate(target, c), c))
        .filter(|(score, _)| *score >= MATCH_THRESHOLD)
        .max_by_key(|(score, _)| *score)
        .map(|(_, c)| c)
}

const LIST_QUERY: &str = r"
query ($userId: Int) {
  MediaListCollection(userId: $userId, type: ANIME) {
    lists {
      entries {
        id
        status
        media { id idMal title { romaji english } seasonYear format }
      }
    }
  }
}";

const SEARCH_QUERY: &str = r"
query ($search: String) {
  Page(perPage: 10) {
    media(search: $search, type: ANIME) {
      id idMal title { romaji english } seasonYear format
    }
  }
}";

const SAVE_MUTATION: &str = r"
mutation ($mediaId: Int, $status: MediaListStatus) {
  SaveMediaListEntry(mediaId: $mediaId, status: $status) { id }
}";

const DELETE_MUTATION: &str = r"
mutation ($id: Int) {
  DeleteMediaListEntry(id: $id) { deleted }
}";

pub struct AnilistAdapter {
    http: HttpClient,
}

impl Default for AnilistAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl AnilistAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self { http: HttpClient::new() }
    }

    async fn graphql(&self, token: &str, query: &str, variables: Value) -> Result<Value, ProviderError> {
        let body = serde_json::json!({ "query": query, "variables": variables });
        let resp = self
            .http
            .request_with_retries(Method::POST, API_BASE, |b| b.bearer_auth(token).json(&body), &RetryConfig::default())
            .await?;
        if !resp.status().is_success() {
            return Err(crate::http::status_to_error(resp).await);
        }
        let parsed: Value = resp.json().await?;
        if let Some(errors) = parsed.get("errors") {
            return Err(ProviderError::Upstream { status: 200, body: errors.to_string() });
        }
        parsed.get("data").cloned().ok_or_else(|| ProviderError::Parse("missing data field".to_string()))
    }

    async fn find_media(&self, token: &str, item: &Item) -> Result<Option<MediaRef>, ProviderError> {
        let Some(title) = &item.title else { return Ok(None) };
        let data = self.graphql(token, SEARCH_QUERY, serde_json::json!({ "search": title })).await?;
        let candidates: Vec<MediaRef> = serde_json::from_value(
            data.get("Page").and_then(|p| p.get("media")).cloned().unwrap_or(Value::Array(vec![])),
        )
        .unwrap_or_default();
        Ok(best_match(item, &candidates).map(|m| MediaRef {
            id: m.id,
            id_mal: m.id_mal,
            title: MediaTitle { romaji: m.title.romaji.clone(), english: m.title.english.clone() },
            season_year: m.season_year,
            format: m.format.clone(),
        }))
    }
}

#[async_trait]
impl ProviderAdapter for AnilistAdapter {
    fn manifest(&self) -> Manifest {
        Manifest {
            name: "anilist",
            label: "AniList",
            version: "1.0.0",
            kind: "sync",
            bidirectional: true,
            features: vec![Feature::Watchlist],
            requires: vec!["access_token", "user_id"],
            capabilities: Capabilities {
                ratings: None,
                index_semantics: IndexSemantics::Present,
                observed_deletes: true,
                can_target: true,
            },
        }
    }

    fn is_configured(&self, cfg: &ConfigView) -> bool {
        require_str(cfg, "access_token").is_ok() && require_str(cfg, "user_id").is_ok()
    }

    async fn health(&self, cfg: &ConfigView) -> HealthReport {
        let (Ok(token), Ok(user_id)) = (require_str(cfg, "access_token"), require_str(cfg, "user_id")) else {
            return HealthReport::not_configured();
        };
        let start = std::time::Instant::now();
        let user_id_num: i64 = user_id.parse().unwrap_or_default();
        match self.graphql(token, LIST_QUERY, serde_json::json!({ "userId": user_id_num })).await {
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
        let token = require_str(cfg, "access_token")?;
        let user_id = require_str(cfg, "user_id")?;
        let user_id_num: i64 = user_id.parse().map_err(|_| ProviderError::MissingConfig("user_id".to_string()))?;
        let data = self.graphql(token, LIST_QUERY, serde_json::json!({ "userId": user_id_num })).await?;

        let lists = data
            .get("MediaListCollection")
            .and_then(|c| c.get("lists"))
            .cloned()
            .unwrap_or(Value::Array(vec![]));
        let mut index = ProviderIndex::new();
        if let Value::Array(lists) = lists {
            for list in lists {
                let entries: Vec<MediaListEntry> =
                    serde_json::from_value(list.get("entries").cloned().unwrap_or(Value::Array(vec![]))).unwrap_or_default();
                for entry in entries {
                    if entry.status != "PLANNING" {
                        continue;
                    }
                    let item = media_ref_to_item(entry.id, &entry.media);
                    let key = crosswatch_identity::canonical_key(&item);
                    index.entry(key).or_insert(item);
                }
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
        if feature != Feature::Watchlist {
            return Ok(AddResult::read_only());
        }
        let token = require_str(cfg, "access_token")?;
        let mut result = AddResult::empty();
        result.count = items.len();

        for item in items {
            let key = crosswatch_identity::canonical_key(item);
            let media_id = if let Some(v) = item.ids.get("anilist").and_then(|v| v.parse::<i64>().ok()) {
                Some(v)
            } else {
                match self.find_media(token, item).await {
                    Ok(found) => found.map(|m| m.id),
                    Err(_) => None,
                }
            };
            let Some(media_id) = media_id else {
                result.unresolved.push(Unresolved { key, reason: "missing_ids".to_string(), hint: None });
                continue;
            };
            if dry_run {
                result.confirmed_keys.push(key);
                continue;
            }
            let vars = serde_json::json!({ "mediaId": media_id, "status": "PLANNING" });
            match self.graphql(token, SAVE_MUTATION, vars).await {
                Ok(_) => result.confirmed_keys.push(key),
                Err(err) => result.unresolved.push(Unresolved { key, reason: err.reason().to_string(), hint: err.hint() }),
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
        let token = require_str(cfg, "access_token")?;
        let mut result = RemoveResult::empty();
        result.count = items.len();

        for item in items {
            let key = crosswatch_identity::canonical_key(item);
            let Some(entry_id) = item
                .provider_data
                .get("list_entry_id")
                .and_then(Value::as_i64)
            else {
                result.unresolved.push(Unresolved { key, reason: "missing_ids".to_string(), hint: None });
                continue;
            };
            if dry_run {
                result.confirmed_keys.push(key);
                continue;
            }
            match self.graphql(token, DELETE_MUTATION, serde_json::json!({ "id": entry_id })).await {
                Ok(_) => result.confirmed_keys.push(key),
                Err(err) => result.unresolved.push(Unresolved { key, reason: err.reason().to_string(), hint: err.hint() }),
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn media(title_en: &str, year: i32, format: &str) -> MediaRef {
        MediaRef {
            id: 1,
            id_mal: None,
            title: MediaTitle { romaji: None, english: Some(title_en.to_string()) },
            season_year: Some(year),
            format: Some(format.to_string()),
        }
    }

    #[test]
    fn exact_title_and_year_match_clears_threshold() {
        let mut target = Item::new(ItemType::Anime);
        target.title = Some("Frieren: Beyond Journey's End".to_string());
        target.year = Some(2023);
        let candidate = media("Frieren: Beyond Journey's End", 2023, "TV");
        assert!(score_candidate(&target, &candidate) >= MATCH_THRESHOLD);
    }

    #[test]
    fn year_mismatch_drops_below_threshold() {
        let mut target = Item::new(ItemType::Anime);
        target.title = Some("Frieren".to_string());
        target.year = Some(2023);
        let candidate = media("Frieren", 1999, "TV");
        assert!(score_candidate(&target, &candidate) < MATCH_THRESHOLD);
    }

    #[test]
    fn best_match_picks_highest_scorer() {
        let mut target = Item::new(ItemType::Anime);
        target.title = Some("Frieren".to_string());
        target.year = Some(2023);
        let candidates = vec![media("Frieren", 1999, "TV"), media("Frieren", 2023, "TV")];
        let found = best_match(&target, &candidates).unwrap();
        assert_eq!(found.season_year, Some(2023));
    }
}
