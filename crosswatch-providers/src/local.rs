//! The CrossWatch local adapter: the only backend that is authoritative
//! rather than a mirror of some vendor's state. One JSON file per
//! `{pair scope, feature}`, written atomically, with a timestamped snapshot
//! taken before every overwrite so a bad sync can be rolled back.
//!
//! Ground truth: spec.md §4.3.x ("CrossWatch local") and
//! `examples/original_source/providers/sync/crosswatch/_watchlist.py`.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use crosswatch_identity::Item;
use serde::{Deserialize, Serialize};

use crate::cfgutil::{owned_str, u64_field};
use crate::error::ProviderError;
use crate::manifest::{
    AddResult, Capabilities, Feature, HealthDetails, HealthReport, IndexSemantics, Manifest,
    RemoveResult, Unresolved,
};
use crate::traits::{ConfigView, ProviderAdapter, ProviderIndex};

#[derive(Debug, Default, Serialize, Deserialize)]
struct FeatureRecord {
    #[serde(default)]
    items: HashMap<String, Item>,
    #[serde(default)]
    updated_at: Option<String>,
}

fn now_iso() -> String {
    let secs = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
    chrono::DateTime::from_timestamp(secs as i64, 0).map(|dt| dt.to_rfc3339()).unwrap_or_default()
}

fn feature_file(dir: &Path, scope: &str, feature: Feature) -> PathBuf {
    dir.join(format!("{scope}.{feature}.json"))
}

fn snapshot_dir(dir: &Path, scope: &str, feature: Feature) -> PathBuf {
    dir.join("snapshots").join(format!("{scope}.{feature}"))
}

fn read_record(path: &Path) -> io::Result<FeatureRecord> {
    match fs::read_to_string(path) {
        Ok(raw) => Ok(serde_json::from_str(&raw).unwrap_or_default()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(FeatureRecord::default()),
        Err(e) => Err(e),
    }
}

/// Writes `record` atomically (`tmp` then rename) and, if a previous
/// version of the file existed, copies it into the snapshot directory
/// first so the write is reversible.
fn write_record_with_snapshot(
    dir: &Path,
    scope: &str,
    feature: Feature,
    record: &FeatureRecord,
    retention_days: u64,
    max_snapshots: u64,
) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    let path = feature_file(dir, scope, feature);

    if path.exists() {
        let snap_dir = snapshot_dir(dir, scope, feature);
        fs::create_dir_all(&snap_dir)?;
        let stamp = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        let snap_path = snap_dir.join(format!("{stamp}.json"));
        fs::copy(&path, &snap_path)?;
        prune_snapshots(&snap_dir, retention_days, max_snapshots)?;
    }

    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, serde_json::to_vec_pretty(record).unwrap_or_default())?;
    fs::rename(&tmp_path, &path)?;
    Ok(())
}

fn prune_snapshots(snap_dir: &Path, retention_days: u64, max_snapshots: u64) -> io::Result<()> {
    let mut entries: Vec<(u64, PathBuf)> = fs::read_dir(snap_dir)?
        .filter_map(Result::ok)
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().trim_end_matches(".json").to_string();
            name.parse::<u64>().ok().map(|stamp| (stamp, e.path()))
        })
        .collect();
    entries.sort_by_key(|(stamp, _)| *stamp);

    if retention_days > 0 {
        let cutoff = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
            .saturating_sub(retention_days * 86_400);
        entries.retain(|(stamp, path)| {
            if *stamp < cutoff {
                let _ = fs::remove_file(path);
                false
            } else {
                true
            }
        });
    }

    if max_snapshots > 0 && entries.len() as u64 > max_snapshots {
        let overflow = entries.len() - max_snapshots as usize;
        for (_, path) in &entries[..overflow] {
            let _ = fs::remove_file(path);
        }
    }
    Ok(())
}

/// Restores `feature`'s live file from its most recent snapshot, used at
/// startup when `restore_<feature>` is `"latest"` and the live file is missing.
fn restore_latest_snapshot(dir: &Path, scope: &str, feature: Feature) -> io::Result<Option<FeatureRecord>> {
    let snap_dir = snapshot_dir(dir, scope, feature);
    let Ok(read_dir) = fs::read_dir(&snap_dir) else { return Ok(None) };
    let latest = read_dir
        .filter_map(Result::ok)
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().trim_end_matches(".json").to_string();
            name.parse::<u64>().ok().map(|stamp| (stamp, e.path()))
        })
        .max_by_key(|(stamp, _)| *stamp);
    match latest {
        Some((_, path)) => {
            let raw = fs::read_to_string(path)?;
            Ok(Some(serde_json::from_str(&raw).unwrap_or_default()))
        }
        None => Ok(None),
    }
}

/// Restores `feature`'s live file from the snapshot named `id` (the
/// snapshot's unix-timestamp filename stem), used at startup when
/// `restore_<feature>` names a specific snapshot id rather than `"latest"`.
fn restore_named_snapshot(dir: &Path, scope: &str, feature: Feature, id: &str) -> io::Result<Option<FeatureRecord>> {
    let path = snapshot_dir(dir, scope, feature).join(format!("{id}.json"));
    match fs::read_to_string(&path) {
        Ok(raw) => Ok(Some(serde_json::from_str(&raw).unwrap_or_default())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// What `restore_<feature>` asks for: nothing, the newest snapshot, or one
/// named by id. `{null,"latest",<snapshot_id>}` per spec.md §6.
enum RestoreSelector {
    Latest,
    Named(String),
}

fn restore_selector(cfg: &ConfigView, feature: Feature) -> Option<RestoreSelector> {
    let key = format!("restore_{feature}");
    match crate::cfgutil::str_field(cfg, &key)? {
        "latest" => Some(RestoreSelector::Latest),
        other => Some(RestoreSelector::Named(other.to_string())),
    }
}

fn io_err_to_provider_error(e: io::Error) -> ProviderError {
    ProviderError::Upstream { status: 0, body: e.to_string() }
}

pub struct LocalAdapter;

impl Default for LocalAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn store_dir(cfg: &ConfigView) -> PathBuf {
        owned_str(cfg, "store_dir").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("./data/crosswatch"))
    }

    fn scope(cfg: &ConfigView) -> String {
        owned_str(cfg, "scope").unwrap_or_else(|| "default".to_string())
    }

    fn load(cfg: &ConfigView, feature: Feature) -> Result<FeatureRecord, ProviderError> {
        let dir = Self::store_dir(cfg);
        let scope = Self::scope(cfg);
        let path = feature_file(&dir, &scope, feature);

        if !path.exists() {
            if let Some(selector) = restore_selector(cfg, feature) {
                let restored = match selector {
                    RestoreSelector::Latest => restore_latest_snapshot(&dir, &scope, feature),
                    RestoreSelector::Named(id) => restore_named_snapshot(&dir, &scope, feature, &id),
                }
                .map_err(io_err_to_provider_error)?;
                if let Some(restored) = restored {
                    return Ok(restored);
                }
            }
        }
        read_record(&path).map_err(io_err_to_provider_error)
    }

    fn save(cfg: &ConfigView, feature: Feature, record: &FeatureRecord) -> Result<(), ProviderError> {
        let dir = Self::store_dir(cfg);
        let scope = Self::scope(cfg);
        let retention_days = u64_field(cfg, "retention_days", 30);
        let max_snapshots = u64_field(cfg, "max_snapshots", 20);
        write_record_with_snapshot(&dir, &scope, feature, record, retention_days, max_snapshots)
            .map_err(io_err_to_provider_error)
    }
}

#[async_trait]
impl ProviderAdapter for LocalAdapter {
    fn manifest(&self) -> Manifest {
        Manifest {
            name: "crosswatch",
            label: "CrossWatch (local)",
            version: "1.0.0",
            kind: "sync",
            bidirectional: true,
            features: vec![Feature::Watchlist, Feature::Ratings, Feature::History, Feature::Playlists],
            requires: vec![],
            capabilities: Capabilities {
                ratings: Some(crate::manifest::RatingsCapability {
                    types: crate::manifest::RatingsTypes { movies: true, shows: true, seasons: true, episodes: true },
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

    fn is_configured(&self, _cfg: &ConfigView) -> bool {
        true
    }

    async fn health(&self, cfg: &ConfigView) -> HealthReport {
        let start = std::time::Instant::now();
        match Self::load(cfg, Feature::Watchlist) {
            Ok(_) => HealthReport {
                ok: true,
                status: "ok".to_string(),
                latency_ms: start.elapsed().as_millis() as u64,
                features: Feature::ALL.iter().map(|f| (f.as_str().to_string(), true)).collect(),
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
        let record = Self::load(cfg, feature)?;
        Ok(record.items.into_iter().collect())
    }

    async fn add(
        &self,
        cfg: &ConfigView,
        items: &[Item],
        feature: Feature,
        dry_run: bool,
    ) -> Result<AddResult, ProviderError> {
        let mut record = Self::load(cfg, feature)?;
        let mut result = AddResult::empty();
        result.count = items.len();

        for item in items {
            let key = crosswatch_identity::canonical_key(item);
            if !dry_run {
                record.items.insert(key.clone(), item.clone());
            }
            result.confirmed_keys.push(key);
        }
        if !dry_run {
            record.updated_at = Some(now_iso());
            Self::save(cfg, feature, &record)?;
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
        let mut record = Self::load(cfg, feature)?;
        let mut result = RemoveResult::empty();
        result.count = items.len();

        for item in items {
            let key = crosswatch_identity::canonical_key(item);
            if !dry_run && record.items.remove(&key).is_none() {
                result.unresolved.push(Unresolved { key: key.clone(), reason: "not_found".to_string(), hint: None });
                continue;
            }
            result.confirmed_keys.push(key);
        }
        if !dry_run {
            record.updated_at = Some(now_iso());
            Self::save(cfg, feature, &record)?;
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crosswatch_identity::ItemType;

    #[test]
    fn round_trips_through_tempdir() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = ConfigView::new();
        cfg.insert("store_dir".to_string(), serde_json::Value::from(tmp.path().to_string_lossy().to_string()));
        cfg.insert("scope".to_string(), serde_json::Value::from("pair-1"));

        let mut item = Item::new(ItemType::Movie);
        item.title = Some("Arrival".to_string());
        item.ids.insert("tmdb".to_string(), "329865".to_string());

        let mut record = FeatureRecord::default();
        record.items.insert(crosswatch_identity::canonical_key(&item), item);
        LocalAdapter::save(&cfg, Feature::Watchlist, &record).unwrap();

        let loaded = LocalAdapter::load(&cfg, Feature::Watchlist).unwrap();
        assert_eq!(loaded.items.len(), 1);
    }

    #[test]
    fn snapshot_taken_on_second_write() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = ConfigView::new();
        cfg.insert("store_dir".to_string(), serde_json::Value::from(tmp.path().to_string_lossy().to_string()));
        cfg.insert("scope".to_string(), serde_json::Value::from("pair-1"));

        LocalAdapter::save(&cfg, Feature::Watchlist, &FeatureRecord::default()).unwrap();
        LocalAdapter::save(&cfg, Feature::Watchlist, &FeatureRecord::default()).unwrap();

        let snap_dir = snapshot_dir(&LocalAdapter::store_dir(&cfg), &LocalAdapter::scope(&cfg), Feature::Watchlist);
        assert!(snap_dir.exists());
        assert_eq!(fs::read_dir(snap_dir).unwrap().count(), 1);
    }

    #[test]
    fn restore_latest_brings_back_most_recent_snapshot() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = ConfigView::new();
        cfg.insert("store_dir".to_string(), serde_json::Value::from(tmp.path().to_string_lossy().to_string()));
        cfg.insert("scope".to_string(), serde_json::Value::from("pair-1"));

        let mut item = Item::new(ItemType::Movie);
        item.ids.insert("tmdb".to_string(), "550".to_string());
        let mut record = FeatureRecord::default();
        record.items.insert(crosswatch_identity::canonical_key(&item), item);
        LocalAdapter::save(&cfg, Feature::Watchlist, &record).unwrap();
        LocalAdapter::save(&cfg, Feature::Watchlist, &FeatureRecord::default()).unwrap();

        let live_path = feature_file(&LocalAdapter::store_dir(&cfg), &LocalAdapter::scope(&cfg), Feature::Watchlist);
        fs::remove_file(&live_path).unwrap();

        cfg.insert("restore_watchlist".to_string(), serde_json::Value::from("latest"));
        let loaded = LocalAdapter::load(&cfg, Feature::Watchlist).unwrap();
        assert_eq!(loaded.items.len(), 1, "the only snapshot taken holds the pre-clear write");
    }

    #[test]
    fn restore_named_snapshot_by_id() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = ConfigView::new();
        cfg.insert("store_dir".to_string(), serde_json::Value::from(tmp.path().to_string_lossy().to_string()));
        cfg.insert("scope".to_string(), serde_json::Value::from("pair-1"));

        let mut item = Item::new(ItemType::Movie);
        item.ids.insert("tmdb".to_string(), "550".to_string());
        let mut record = FeatureRecord::default();
        record.items.insert(crosswatch_identity::canonical_key(&item), item);
        LocalAdapter::save(&cfg, Feature::Watchlist, &record).unwrap();
        LocalAdapter::save(&cfg, Feature::Watchlist, &FeatureRecord::default()).unwrap();

        let snap_dir = snapshot_dir(&LocalAdapter::store_dir(&cfg), &LocalAdapter::scope(&cfg), Feature::Watchlist);
        let snap_id = fs::read_dir(&snap_dir)
            .unwrap()
            .next()
            .unwrap()
            .unwrap()
            .file_name()
            .to_string_lossy()
            .trim_end_matches(".json")
            .to_string();

        let live_path = feature_file(&LocalAdapter::store_dir(&cfg), &LocalAdapter::scope(&cfg), Feature::Watchlist);
        fs::remove_file(&live_path).unwrap();

        cfg.insert("restore_watchlist".to_string(), serde_json::Value::from(snap_id));
        let loaded = LocalAdapter::load(&cfg, Feature::Watchlist).unwrap();
        assert_eq!(loaded.items.len(), 1, "named snapshot was the pre-clear write");
    }
}
