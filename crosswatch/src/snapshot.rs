//! Content-addressed, labeled captures of a provider/feature index: create,
//! list, read, restore, delete, diff, and prune by retention policy.
//!
//! Filename grammar: `{stamp}__{PROV}__{instance}__{feature}__{label}.json`
//! under `<root>/<YYYY-MM-DD>/`, where `stamp` is `YYYYMMDDTHHMMSSZ` shared
//! by a bundle and all of its children.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::Utc;
use crosswatch_identity::Item;
use crosswatch_providers::{Feature, ProviderAdapter};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::ConfigView;
use crate::error::CoreError;

fn now_iso() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

fn stamp_now() -> String {
    Utc::now().format("%Y%m%dT%H%M%SZ").to_string()
}

/// Drops any character outside `[A-Za-z0-9._-]`, folding spaces to `_`
/// first; truncated to 60 chars. Falls back to `"snapshot"` if that leaves
/// nothing.
#[must_use]
pub fn safe_label(raw: &str) -> String {
    let mut out = String::new();
    for ch in raw.trim().chars() {
        if ch.is_ascii_alphanumeric() || ch == '.' || ch == '_' || ch == '-' {
            out.push(ch);
        } else if ch == ' ' {
            out.push('_');
        }
    }
    let truncated: String = out.chars().take(60).collect();
    if truncated.is_empty() {
        "snapshot".to_string()
    } else {
        truncated
    }
}

fn snap_name(stamp: &str, provider: &str, instance: &str, feature: &str, label: &str) -> String {
    format!("{stamp}__{}__{instance}__{feature}__{label}.json", provider.to_uppercase())
}

static FILENAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<stamp>\d{8}T\d{6}Z)__(?P<prov>[A-Z0-9]+)__(?P<inst>[A-Za-z0-9._-]+)__(?P<feat>watchlist|ratings|history|all)__(?P<label>.+)\.json$")
        .expect("snapshot filename regex is valid")
});

fn by_type_stats(items: &BTreeMap<String, Item>) -> Vec<(String, usize)> {
    let mut counts: std::collections::HashMap<&'static str, usize> = std::collections::HashMap::new();
    for item in items.values() {
        *counts.entry(item.item_type.stats_bucket()).or_insert(0) += 1;
    }
    let mut out: Vec<(String, usize)> = counts.into_iter().map(|(k, v)| (k.to_string(), v)).collect();
    out.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    out
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotStats {
    pub feature: String,
    pub count: usize,
    pub by_type: Vec<(String, usize)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub kind: String,
    pub created_at: String,
    pub provider: String,
    pub instance: String,
    pub feature: String,
    pub label: String,
    pub app_version: String,
    pub stats: SnapshotStats,
    pub items: BTreeMap<String, Item>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleChild {
    pub feature: String,
    pub path: String,
    pub stats: SnapshotStats,
}

/// Bundle-level stats, keyed by feature rather than item type: `{feature:
/// "all", count, features: {watchlist, ratings, history}}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BundleStats {
    pub feature: String,
    pub count: usize,
    pub features: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotBundle {
    pub kind: String,
    pub created_at: String,
    pub provider: String,
    pub instance: String,
    pub label: String,
    pub app_version: String,
    pub stats: BundleStats,
    pub children: Vec<BundleChild>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SnapshotDocument {
    Bundle(SnapshotBundle),
    Snapshot(Snapshot),
}

#[derive(Debug, Clone)]
pub struct SnapshotMeta {
    pub stamp: String,
    pub provider: String,
    pub instance: String,
    pub feature: String,
    pub label: String,
    pub path: PathBuf,
    pub stats: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreMode {
    Merge,
    ClearRestore,
}

#[derive(Debug, Clone, Default)]
pub struct RestoreReport {
    pub ok: bool,
    pub added: usize,
    pub removed: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldChange {
    pub path: String,
    pub old: Value,
    pub new: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdatedEntry {
    pub key: String,
    pub old: Value,
    pub new: Value,
    pub changes: Vec<FieldChange>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DiffSummary {
    pub added: usize,
    pub removed: usize,
    pub updated: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DiffTruncated {
    pub added: bool,
    pub removed: bool,
    pub updated: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DiffResult {
    pub added: Vec<Value>,
    pub removed: Vec<Value>,
    pub updated: Vec<UpdatedEntry>,
    pub summary: DiffSummary,
    pub truncated: DiffTruncated,
}

fn brief_item(item: &Item) -> Value {
    json!({
        "type": item.item_type.as_str(),
        "title": item.title,
        "year": item.year,
        "season": item.season,
        "episode": item.episode,
        "status": item.provider_data.get("status"),
        "ids": {
            "imdb": item.ids.get("imdb"),
            "tmdb": item.ids.get("tmdb"),
            "tvdb": item.ids.get("tvdb"),
            "trakt": item.ids.get("trakt"),
            "simkl": item.ids.get("simkl"),
            "anidb": item.ids.get("anidb"),
            "mal": item.ids.get("mal"),
            "anilist": item.ids.get("anilist"),
            "kitsu": item.ids.get("kitsu"),
        },
    })
}

fn diff_any(old: &Value, new: &Value, path: &str, depth: usize, max_depth: usize, max_changes: usize, out: &mut Vec<FieldChange>) {
    if out.len() >= max_changes || old == new {
        return;
    }
    if let (Value::Object(o), Value::Object(n)) = (old, new) {
        if depth < max_depth {
            let mut keys: Vec<&String> = o.keys().chain(n.keys()).collect();
            keys.sort();
            keys.dedup();
            for key in keys {
                if out.len() >= max_changes {
                    return;
                }
                let ov = o.get(key).cloned().unwrap_or(Value::Null);
                let nv = n.get(key).cloned().unwrap_or(Value::Null);
                let child_path = if path.is_empty() { key.clone() } else { format!("{path}.{key}") };
                diff_any(&ov, &nv, &child_path, depth + 1, max_depth, max_changes, out);
            }
            return;
        }
    }
    out.push(FieldChange { path: path.to_string(), old: old.clone(), new: new.clone() });
}

pub struct Snapshotter {
    root: PathBuf,
}

impl Snapshotter {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn day_dir(&self, stamp: &str) -> PathBuf {
        let day = format!("{}-{}-{}", &stamp[0..4], &stamp[4..6], &stamp[6..8]);
        self.root.join(day)
    }

    /// Builds `feature`'s full index and writes it atomically as a new
    /// snapshot.
    pub async fn create(
        &self,
        adapter: &dyn ProviderAdapter,
        cfg: &ConfigView,
        instance: &str,
        feature: Feature,
        label: &str,
    ) -> Result<SnapshotMeta, CoreError> {
        let stamp = stamp_now();
        let (path, doc) = self.create_at(adapter, cfg, instance, feature, label, &stamp).await?;
        let stats = serde_json::to_value(&doc.stats).map_err(CoreError::Serialization)?;
        Ok(SnapshotMeta { stamp, provider: doc.provider, instance: doc.instance, feature: doc.feature, label: doc.label, path, stats })
    }

    async fn create_at(
        &self,
        adapter: &dyn ProviderAdapter,
        cfg: &ConfigView,
        instance: &str,
        feature: Feature,
        label: &str,
        stamp: &str,
    ) -> Result<(PathBuf, Snapshot), CoreError> {
        if feature == Feature::Playlists {
            return Err(CoreError::Snapshot("playlists are not snapshotted individually".to_string()));
        }
        let items = adapter
            .build_index(cfg, feature)
            .await
            .map_err(|source| CoreError::Provider { provider: adapter.manifest().name.to_string(), op: "build_index", source })?;
        self.write_snapshot(adapter.manifest().name, instance, feature, label, stamp, items)
    }

    fn write_snapshot(
        &self,
        provider: &str,
        instance: &str,
        feature: Feature,
        label: &str,
        stamp: &str,
        items: BTreeMap<String, Item>,
    ) -> Result<(PathBuf, Snapshot), CoreError> {
        let label = safe_label(label);
        let doc = Snapshot {
            kind: "snapshot".to_string(),
            created_at: now_iso(),
            provider: provider.to_string(),
            instance: instance.to_string(),
            feature: feature.as_str().to_string(),
            label: label.clone(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            stats: SnapshotStats { feature: feature.as_str().to_string(), count: items.len(), by_type: by_type_stats(&items) },
            items,
        };

        let filename = snap_name(stamp, provider, instance, feature.as_str(), &label);
        let dir = self.day_dir(stamp);
        std::fs::create_dir_all(&dir).map_err(CoreError::Io)?;
        let path = dir.join(&filename);
        write_json_atomic(&path, &SnapshotDocument::Snapshot(doc.clone()))?;

        Ok((path, doc))
    }

    /// Builds one child snapshot per feature the adapter declares, plus a
    /// parent bundle document sharing the same stamp. Features whose index
    /// is empty are recorded in the aggregate stats but get no child file.
    pub async fn create_bundle(
        &self,
        adapter: &dyn ProviderAdapter,
        cfg: &ConfigView,
        instance: &str,
        label: &str,
    ) -> Result<SnapshotMeta, CoreError> {
        let stamp = stamp_now();
        let manifest = adapter.manifest();
        let label = safe_label(label);

        let mut children = Vec::new();
        let mut feature_counts = BTreeMap::new();
        for feature in manifest.features.iter().copied().filter(|f| *f != Feature::Playlists) {
            let items = adapter
                .build_index(cfg, feature)
                .await
                .map_err(|source| CoreError::Provider { provider: manifest.name.to_string(), op: "build_index", source })?;
            feature_counts.insert(feature.as_str().to_string(), items.len());
            if items.is_empty() {
                continue;
            }
            let (child_path, child_doc) = self.write_snapshot(manifest.name, instance, feature, &label, &stamp, items)?;
            let relative = child_path.strip_prefix(&self.root).unwrap_or(&child_path).to_string_lossy().replace('\\', "/");
            children.push(BundleChild { feature: feature.as_str().to_string(), path: relative, stats: child_doc.stats });
        }

        let total = feature_counts.values().sum();
        let stats = BundleStats { feature: "all".to_string(), count: total, features: feature_counts };
        let bundle = SnapshotBundle {
            kind: "snapshot_bundle".to_string(),
            created_at: now_iso(),
            provider: manifest.name.to_string(),
            instance: instance.to_string(),
            label: label.clone(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            stats,
            children,
        };

        let filename = snap_name(&stamp, manifest.name, instance, "all", &label);
        let dir = self.day_dir(&stamp);
        let path = dir.join(&filename);
        write_json_atomic(&path, &SnapshotDocument::Bundle(bundle.clone()))?;

        let meta_stats = serde_json::to_value(&bundle.stats).map_err(CoreError::Serialization)?;
        Ok(SnapshotMeta { stamp, provider: manifest.name.to_string(), instance: instance.to_string(), feature: "all".to_string(), label, path, stats: meta_stats })
    }

    /// Recursive directory scan, newest first by file modified time. Parses
    /// metadata from the filename alone; `stats` is `Value::Null` here, call
    /// `read()` on the path for the full document.
    pub fn list(&self) -> Result<Vec<SnapshotMeta>, CoreError> {
        let mut entries = Vec::new();
        if self.root.exists() {
            collect_snapshot_files(&self.root, &mut entries).map_err(CoreError::Io)?;
        }

        let mut metas: Vec<(std::time::SystemTime, SnapshotMeta)> = Vec::new();
        for path in entries {
            let Some(filename) = path.file_name().and_then(|n| n.to_str()) else { continue };
            let Some(caps) = FILENAME_RE.captures(filename) else { continue };
            let mtime = std::fs::metadata(&path).and_then(|m| m.modified()).unwrap_or(std::time::SystemTime::UNIX_EPOCH);
            metas.push((
                mtime,
                SnapshotMeta {
                    stamp: caps["stamp"].to_string(),
                    provider: caps["prov"].to_string(),
                    instance: caps["inst"].to_string(),
                    feature: caps["feat"].to_string(),
                    label: caps["label"].to_string(),
                    path,
                    stats: Value::Null,
                },
            ));
        }
        metas.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(metas.into_iter().map(|(_, m)| m).collect())
    }

    fn ensure_inside_root(&self, path: &Path) -> Result<PathBuf, CoreError> {
        let root_canon = self.root.canonicalize().unwrap_or_else(|_| self.root.clone());
        let path_canon = path.canonicalize().map_err(CoreError::Io)?;
        if !path_canon.starts_with(&root_canon) {
            return Err(CoreError::Snapshot(format!("path {} is outside the snapshot root", path.display())));
        }
        Ok(path_canon)
    }

    /// Reads and parses a snapshot or bundle document, refusing any path
    /// outside the snapshot root.
    pub fn read(&self, path: &Path) -> Result<SnapshotDocument, CoreError> {
        let canon = self.ensure_inside_root(path)?;
        let bytes = std::fs::read(&canon).map_err(CoreError::Io)?;
        let doc: SnapshotDocument = serde_json::from_slice(&bytes).map_err(CoreError::Serialization)?;
        Ok(doc)
    }

    /// Refuses paths outside root; with `delete_children`, also removes
    /// every child referenced by a bundle document.
    pub fn delete(&self, path: &Path, delete_children: bool) -> Result<(), CoreError> {
        self.ensure_inside_root(path)?;
        if delete_children {
            if let Ok(SnapshotDocument::Bundle(bundle)) = self.read(path) {
                for child in &bundle.children {
                    let _ = std::fs::remove_file(self.root.join(&child.path));
                }
            }
        }
        std::fs::remove_file(path).map_err(CoreError::Io)
    }

    /// `merge`: adds snapshot items not currently present at the
    /// destination. `clear_restore`: removes everything currently present,
    /// then adds all snapshot items; aborts before the add phase on any
    /// remove error. Bundle restores recurse into each child.
    pub async fn restore(
        &self,
        path: &Path,
        adapter: &dyn ProviderAdapter,
        cfg: &ConfigView,
        mode: RestoreMode,
        dry_run: bool,
    ) -> Result<RestoreReport, CoreError> {
        self.ensure_inside_root(path)?;
        match self.read(path)? {
            SnapshotDocument::Snapshot(snap) => self.restore_one(&snap, adapter, cfg, mode, dry_run).await,
            SnapshotDocument::Bundle(bundle) => {
                let mut total = RestoreReport { ok: true, ..RestoreReport::default() };
                for child in &bundle.children {
                    let child_path = self.root.join(&child.path);
                    let SnapshotDocument::Snapshot(child_snap) = self.read(&child_path)? else {
                        continue;
                    };
                    let report = self.restore_one(&child_snap, adapter, cfg, mode, dry_run).await?;
                    total.added += report.added;
                    total.removed += report.removed;
                    total.errors.extend(report.errors);
                    if !report.ok && mode == RestoreMode::ClearRestore {
                        total.ok = false;
                        return Ok(total);
                    }
                }
                total.ok = total.errors.is_empty();
                Ok(total)
            }
        }
    }

    async fn restore_one(
        &self,
        snap: &Snapshot,
        adapter: &dyn ProviderAdapter,
        cfg: &ConfigView,
        mode: RestoreMode,
        dry_run: bool,
    ) -> Result<RestoreReport, CoreError> {
        let feature = feature_from_str(&snap.feature)?;
        let mut report = RestoreReport::default();

        if mode == RestoreMode::ClearRestore {
            let current = adapter
                .build_index(cfg, feature)
                .await
                .map_err(|source| CoreError::Provider { provider: adapter.manifest().name.to_string(), op: "build_index", source })?;
            let current_items: Vec<Item> = current.into_values().collect();
            if !current_items.is_empty() {
                let remove_result = adapter
                    .remove(cfg, &current_items, feature, dry_run)
                    .await
                    .map_err(|source| CoreError::Provider { provider: adapter.manifest().name.to_string(), op: "remove", source })?;
                report.removed = remove_result.confirmed_keys.len();
                if !remove_result.unresolved.is_empty() {
                    report.errors.extend(remove_result.unresolved.iter().map(|u| format!("{}: {}", u.key, u.reason)));
                    report.ok = false;
                    return Ok(report);
                }
            }
        }

        let existing: HashSet<String> = if mode == RestoreMode::Merge {
            adapter
                .build_index(cfg, feature)
                .await
                .map_err(|source| CoreError::Provider { provider: adapter.manifest().name.to_string(), op: "build_index", source })?
                .into_keys()
                .collect()
        } else {
            HashSet::new()
        };

        let to_add: Vec<Item> =
            snap.items.iter().filter(|(k, _)| mode == RestoreMode::ClearRestore || !existing.contains(*k)).map(|(_, v)| v.clone()).collect();

        if !to_add.is_empty() {
            let add_result = adapter
                .add(cfg, &to_add, feature, dry_run)
                .await
                .map_err(|source| CoreError::Provider { provider: adapter.manifest().name.to_string(), op: "add", source })?;
            report.added = add_result.confirmed_keys.len();
            report.errors.extend(add_result.unresolved.iter().map(|u| format!("{}: {}", u.key, u.reason)));
        }

        report.ok = report.errors.is_empty();
        Ok(report)
    }

    /// Convenience: builds `feature`'s index, then removes everything found
    /// in chunks. Used to clear a provider before decommissioning a pair.
    pub async fn clear_provider_features(
        &self,
        adapter: &dyn ProviderAdapter,
        cfg: &ConfigView,
        features: &[Feature],
        dry_run: bool,
    ) -> Result<std::collections::HashMap<Feature, crosswatch_providers::RemoveResult>, CoreError> {
        let mut out = std::collections::HashMap::new();
        for feature in features {
            let index = adapter
                .build_index(cfg, *feature)
                .await
                .map_err(|source| CoreError::Provider { provider: adapter.manifest().name.to_string(), op: "build_index", source })?;
            let items: Vec<Item> = index.into_values().collect();
            let result = adapter
                .remove(cfg, &items, *feature, dry_run)
                .await
                .map_err(|source| CoreError::Provider { provider: adapter.manifest().name.to_string(), op: "remove", source })?;
            out.insert(*feature, result);
        }
        Ok(out)
    }

    /// Structural diff between two snapshot documents. Updated entries carry
    /// per-field changes down to `max_depth`, capped at `max_changes`; each
    /// bucket is capped at `limit` with a `truncated` flag.
    pub fn diff(&self, path_a: &Path, path_b: &Path, limit: usize, max_depth: usize, max_changes: usize) -> Result<DiffResult, CoreError> {
        let items_a = self.snapshot_items(path_a)?;
        let items_b = self.snapshot_items(path_b)?;

        let keys_a: HashSet<&String> = items_a.keys().collect();
        let keys_b: HashSet<&String> = items_b.keys().collect();

        let mut added_keys: Vec<&String> = keys_b.difference(&keys_a).copied().collect();
        added_keys.sort();
        let mut removed_keys: Vec<&String> = keys_a.difference(&keys_b).copied().collect();
        removed_keys.sort();
        let mut common_keys: Vec<&String> = keys_a.intersection(&keys_b).copied().collect();
        common_keys.sort();

        let mut result = DiffResult::default();

        result.truncated.added = added_keys.len() > limit;
        for key in added_keys.into_iter().take(limit) {
            result.added.push(brief_item(&items_b[key]));
        }

        result.truncated.removed = removed_keys.len() > limit;
        for key in removed_keys.into_iter().take(limit) {
            result.removed.push(brief_item(&items_a[key]));
        }

        let mut updated = Vec::new();
        for key in common_keys {
            let old_brief = brief_item(&items_a[key]);
            let new_brief = brief_item(&items_b[key]);
            if old_brief == new_brief {
                continue;
            }
            let mut changes = Vec::new();
            diff_any(&old_brief, &new_brief, "", 0, max_depth, max_changes, &mut changes);
            updated.push(UpdatedEntry { key: key.clone(), old: old_brief, new: new_brief, changes });
        }
        result.truncated.updated = updated.len() > limit;
        result.updated = updated.into_iter().take(limit).collect();

        result.summary = DiffSummary { added: result.added.len(), removed: result.removed.len(), updated: result.updated.len() };
        Ok(result)
    }

    fn snapshot_items(&self, path: &Path) -> Result<BTreeMap<String, Item>, CoreError> {
        match self.read(path)? {
            SnapshotDocument::Snapshot(snap) => Ok(snap.items),
            SnapshotDocument::Bundle(_) => Err(CoreError::Snapshot(format!("{} is a bundle; diff a child snapshot instead", path.display()))),
        }
    }

    /// Deletes files older than `retention_days` by mtime, then trims to
    /// `max_snapshots` newest, oldest-first.
    pub fn apply_retention(&self, retention_days: Option<u64>, max_snapshots: Option<usize>) -> Result<(), CoreError> {
        let metas = self.list()?;
        if let Some(days) = retention_days {
            let cutoff = std::time::SystemTime::now() - std::time::Duration::from_secs(days * 86400);
            for meta in &metas {
                if let Ok(modified) = std::fs::metadata(&meta.path).and_then(|m| m.modified()) {
                    if modified < cutoff {
                        let _ = std::fs::remove_file(&meta.path);
                    }
                }
            }
        }
        if let Some(max) = max_snapshots {
            let remaining = self.list()?;
            for meta in remaining.into_iter().skip(max) {
                let _ = std::fs::remove_file(&meta.path);
            }
        }
        Ok(())
    }
}

fn feature_from_str(s: &str) -> Result<Feature, CoreError> {
    match s {
        "watchlist" => Ok(Feature::Watchlist),
        "ratings" => Ok(Feature::Ratings),
        "history" => Ok(Feature::History),
        "playlists" => Ok(Feature::Playlists),
        other => Err(CoreError::Snapshot(format!("unknown snapshot feature: {other}"))),
    }
}

fn collect_snapshot_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_snapshot_files(&path, out)?;
        } else if path.extension().and_then(|e| e.to_str()) == Some("json") {
            out.push(path);
        }
    }
    Ok(())
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), CoreError> {
    let tmp_path = path.with_extension("tmp");
    let body = serde_json::to_vec_pretty(value).map_err(CoreError::Serialization)?;
    std::fs::write(&tmp_path, body).map_err(CoreError::Io)?;
    std::fs::rename(&tmp_path, path).map_err(CoreError::Io)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_label_folds_spaces_and_drops_unsafe_chars() {
        assert_eq!(safe_label("weekly backup #1!"), "weekly_backup_1");
        assert_eq!(safe_label(""), "snapshot");
        assert_eq!(safe_label("@@@"), "snapshot");
    }

    #[test]
    fn safe_label_truncates_to_60_chars() {
        let long = "a".repeat(100);
        assert_eq!(safe_label(&long).len(), 60);
    }

    #[test]
    fn snap_name_matches_grammar() {
        let name = snap_name("20260101T000000Z", "plex", "default", "watchlist", "nightly");
        assert!(FILENAME_RE.is_match(&name));
    }

    #[test]
    fn by_type_stats_buckets_tv_types_together() {
        let mut items = BTreeMap::new();
        items.insert("a".to_string(), Item::new(crosswatch_identity::ItemType::Movie));
        items.insert("b".to_string(), Item::new(crosswatch_identity::ItemType::Show));
        items.insert("c".to_string(), Item::new(crosswatch_identity::ItemType::Episode));
        let stats = by_type_stats(&items);
        let tv = stats.iter().find(|(k, _)| k == "tv").unwrap();
        assert_eq!(tv.1, 2);
    }

    #[test]
    fn diff_any_detects_nested_field_change() {
        let old = json!({"ids": {"tmdb": "1"}, "title": "A"});
        let new = json!({"ids": {"tmdb": "2"}, "title": "A"});
        let mut changes = Vec::new();
        diff_any(&old, &new, "", 0, 4, 25, &mut changes);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].path, "ids.tmdb");
    }

    #[test]
    fn list_is_empty_when_root_missing() {
        let dir = tempfile::tempdir().unwrap();
        let snapshotter = Snapshotter::new(dir.path().join("does-not-exist"));
        assert!(snapshotter.list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_then_list_then_read_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let snapshotter = Snapshotter::new(dir.path());
        let adapter = crosswatch_providers::LocalAdapter::new();
        let mut cfg = ConfigView::new();
        cfg.insert("store_dir".to_string(), Value::String(dir.path().join("store").to_string_lossy().to_string()));

        let meta = snapshotter.create(&adapter, &cfg, "default", Feature::Watchlist, "first run!").await.unwrap();
        assert_eq!(meta.label, "first_run");

        let listed = snapshotter.list().unwrap();
        assert_eq!(listed.len(), 1);

        let doc = snapshotter.read(&meta.path).unwrap();
        match doc {
            SnapshotDocument::Snapshot(snap) => assert_eq!(snap.feature, "watchlist"),
            SnapshotDocument::Bundle(_) => panic!("expected a single snapshot"),
        }
    }

    #[tokio::test]
    async fn bundle_aggregates_per_feature_counts_and_deletes_children() {
        let dir = tempfile::tempdir().unwrap();
        let snapshotter = Snapshotter::new(dir.path());
        let adapter = crosswatch_providers::LocalAdapter::new();
        let mut cfg = ConfigView::new();
        cfg.insert("store_dir".to_string(), Value::String(dir.path().join("store").to_string_lossy().to_string()));

        for (key, ids) in [("m1", "tt0000001"), ("m2", "tt0000002"), ("m3", "tt0000003")] {
            let mut item = Item::new(crosswatch_identity::ItemType::Movie);
            item.ids.insert("imdb".to_string(), ids.to_string());
            adapter.add(&cfg, std::slice::from_ref(&item), Feature::Watchlist, false).await.unwrap();
            let _ = key;
        }
        for ids in ["tt0000001", "tt0000002"] {
            let mut item = Item::new(crosswatch_identity::ItemType::Movie);
            item.ids.insert("imdb".to_string(), ids.to_string());
            item.rating = Some(8);
            adapter.add(&cfg, std::slice::from_ref(&item), Feature::Ratings, false).await.unwrap();
        }

        let meta = snapshotter.create_bundle(&adapter, &cfg, "default", "bundle run").await.unwrap();
        let SnapshotDocument::Bundle(bundle) = snapshotter.read(&meta.path).unwrap() else {
            panic!("expected a bundle");
        };
        assert_eq!(bundle.children.len(), 2);
        assert_eq!(bundle.stats.count, 5);
        assert_eq!(bundle.stats.features.get("watchlist"), Some(&3));
        assert_eq!(bundle.stats.features.get("ratings"), Some(&2));
        assert_eq!(bundle.stats.features.get("history"), Some(&0));
        assert!(bundle.children.iter().all(|c| c.feature != "history"));

        snapshotter.delete(&meta.path, true).unwrap();
        assert!(!meta.path.exists());
        assert!(snapshotter.list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn restore_merge_onto_empty_destination_matches_snapshot_keys() {
        let dir = tempfile::tempdir().unwrap();
        let snapshotter = Snapshotter::new(dir.path());

        let source = crosswatch_providers::LocalAdapter::new();
        let mut src_cfg = ConfigView::new();
        src_cfg.insert("store_dir".to_string(), Value::String(dir.path().join("src").to_string_lossy().to_string()));
        for ids in ["tt0000001", "tt0000002"] {
            let mut item = Item::new(crosswatch_identity::ItemType::Movie);
            item.ids.insert("imdb".to_string(), ids.to_string());
            source.add(&src_cfg, std::slice::from_ref(&item), Feature::Watchlist, false).await.unwrap();
        }
        let meta = snapshotter.create(&source, &src_cfg, "default", Feature::Watchlist, "before restore").await.unwrap();

        let dest = crosswatch_providers::LocalAdapter::new();
        let mut dst_cfg = ConfigView::new();
        dst_cfg.insert("store_dir".to_string(), Value::String(dir.path().join("dst").to_string_lossy().to_string()));

        let report = snapshotter.restore(&meta.path, &dest, &dst_cfg, RestoreMode::Merge, false).await.unwrap();
        assert!(report.ok);
        assert_eq!(report.added, 2);

        let snapshot_keys: std::collections::BTreeSet<_> = snapshotter.snapshot_items(&meta.path).unwrap().into_keys().collect();
        let dest_keys: std::collections::BTreeSet<_> = dest.build_index(&dst_cfg, Feature::Watchlist).await.unwrap().into_keys().collect();
        assert_eq!(snapshot_keys, dest_keys);
    }

    #[tokio::test]
    async fn apply_retention_keeps_newest_max_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let snapshotter = Snapshotter::new(dir.path());
        let adapter = crosswatch_providers::LocalAdapter::new();
        let mut cfg = ConfigView::new();
        cfg.insert("store_dir".to_string(), Value::String(dir.path().join("store").to_string_lossy().to_string()));

        let mut paths = Vec::new();
        for label in ["one", "two", "three"] {
            let meta = snapshotter.create(&adapter, &cfg, "default", Feature::Watchlist, label).await.unwrap();
            paths.push(meta.path);
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        snapshotter.apply_retention(None, Some(2)).unwrap();

        let remaining = snapshotter.list().unwrap();
        assert_eq!(remaining.len(), 2);
        assert!(!paths[0].exists(), "oldest snapshot should have been pruned");
        assert!(paths[1].exists());
        assert!(paths[2].exists());
    }
}
