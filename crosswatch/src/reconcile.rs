//! Pairwise delta computation and apply loop between two provider indexes.
//! One `Reconciler::run` call handles one `(src, dst, feature, direction)`
//! combination; the caller (the binary's main loop) iterates over configured
//! pairs and features.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use crosswatch_identity::Item;
use crosswatch_providers::{AddResult, Feature, ProviderAdapter, ProviderIndex, RemoveResult};

use crate::config::{ConfigView, Direction};
use crate::error::CoreError;
use crate::progress::ProgressEmitter;
use crate::state::{PairState, ShadowEntry};

fn now_iso() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Cross-checks the source/destination capability surface for `feature`
/// before a pair is allowed to run: `mirror` needs `src.read && dst.write`;
/// `two-way` needs read+write on both sides.
pub fn validate_pair(
    src: &dyn ProviderAdapter,
    dst: &dyn ProviderAdapter,
    feature: Feature,
    direction: Direction,
) -> Result<(), CoreError> {
    let src_manifest = src.manifest();
    let dst_manifest = dst.manifest();
    let src_reads = src_manifest.features.contains(&feature);
    let dst_reads = dst_manifest.features.contains(&feature);
    let src_writes = src_reads && src_manifest.capabilities.can_target;
    let dst_writes = dst_reads && dst_manifest.capabilities.can_target;

    let ok = match direction {
        Direction::Mirror => src_reads && dst_writes,
        Direction::TwoWay => src_reads && src_writes && dst_reads && dst_writes,
    };

    if ok {
        return Ok(());
    }

    Err(CoreError::InvalidPair {
        pair: format!("{}->{}", src_manifest.name, dst_manifest.name),
        reason: match direction {
            Direction::Mirror => {
                format!("mirror requires {} to read and {} to write {feature}", src_manifest.name, dst_manifest.name)
            }
            Direction::TwoWay => {
                format!("two-way requires read+write on both {} and {} for {feature}", src_manifest.name, dst_manifest.name)
            }
        },
    })
}

async fn build_index(adapter: &dyn ProviderAdapter, cfg: &ConfigView, feature: Feature) -> Result<ProviderIndex, CoreError> {
    adapter
        .build_index(cfg, feature)
        .await
        .map_err(|source| CoreError::Provider { provider: adapter.manifest().name.to_string(), op: "build_index", source })
}

fn keys_to_add(from_idx: &ProviderIndex, to_idx: &ProviderIndex, ignored: &HashSet<String>) -> Vec<String> {
    from_idx.keys().filter(|k| !to_idx.contains_key(*k) && !ignored.contains(*k)).cloned().collect()
}

fn keys_to_remove(baseline: &std::collections::BTreeMap<String, Item>, to_idx: &ProviderIndex, from_idx: &ProviderIndex) -> Vec<String> {
    baseline.keys().filter(|k| to_idx.contains_key(*k) && !from_idx.contains_key(*k)).cloned().collect()
}

/// `true` when a key present on both sides carries a different rating or
/// watched timestamp and therefore needs two-way conflict resolution.
fn item_value_differs(a: &Item, b: &Item) -> bool {
    a.rating != b.rating || a.watched_at != b.watched_at
}

/// The side with the later of `rated_at`/`watched_at` wins (both are RFC3339
/// `Z` timestamps, which sort correctly as plain strings). `None` when
/// neither side carries a timestamp, or they tie — no update is pushed
/// either way in that case, per the open question in spec.md §9.
fn newer_side(a: &Item, b: &Item) -> Option<std::cmp::Ordering> {
    let a_ts = a.rated_at.as_deref().or(a.watched_at.as_deref())?;
    let b_ts = b.rated_at.as_deref().or(b.watched_at.as_deref())?;
    let ordering = a_ts.cmp(b_ts);
    if ordering == std::cmp::Ordering::Equal {
        None
    } else {
        Some(ordering)
    }
}

/// For keys present on both indexes, collects the items whose value needs to
/// move from `from_idx` to `to_idx` to resolve a two-way conflict (i.e.
/// `from_idx`'s copy is newer).
fn conflict_updates(from_idx: &ProviderIndex, to_idx: &ProviderIndex, ignored: &HashSet<String>) -> Vec<Item> {
    from_idx
        .iter()
        .filter_map(|(key, from_item)| {
            if ignored.contains(key) {
                return None;
            }
            let to_item = to_idx.get(key)?;
            if !item_value_differs(from_item, to_item) {
                return None;
            }
            (newer_side(from_item, to_item) == Some(std::cmp::Ordering::Greater)).then(|| from_item.clone())
        })
        .collect()
}

/// Prefers the richer `ids` set between the two sides, merging the other
/// side's ids in rather than discarding them.
fn resolve_item(key: &str, from_idx: &ProviderIndex, to_idx: &ProviderIndex) -> Option<Item> {
    match (from_idx.get(key), to_idx.get(key)) {
        (Some(a), Some(b)) => {
            let mut item = if a.ids.len() >= b.ids.len() { a.clone() } else { b.clone() };
            item.ids = crosswatch_identity::merge_ids(&a.ids, &b.ids);
            Some(item)
        }
        (Some(a), None) => Some(a.clone()),
        (None, Some(b)) => Some(b.clone()),
        (None, None) => None,
    }
}

async fn apply_add(
    adapter: &dyn ProviderAdapter,
    cfg: &ConfigView,
    items: &[Item],
    feature: Feature,
    dry_run: bool,
    chunk_size: usize,
    progress: &mut ProgressEmitter,
) -> Result<AddResult, CoreError> {
    let mut combined = AddResult::empty();
    combined.count = items.len();
    let total = items.len() as u64;
    let mut done = 0u64;
    for chunk in items.chunks(chunk_size.max(1)) {
        let result = adapter
            .add(cfg, chunk, feature, dry_run)
            .await
            .map_err(|source| CoreError::Provider { provider: adapter.manifest().name.to_string(), op: "add", source })?;
        combined.confirmed_keys.extend(result.confirmed_keys);
        combined.skipped_keys.extend(result.skipped_keys);
        combined.unresolved.extend(result.unresolved);
        done += chunk.len() as u64;
        progress.tick(done, Some(total), None, false);
    }
    combined.ok = combined.unresolved.is_empty();
    Ok(combined)
}

async fn apply_remove(
    adapter: &dyn ProviderAdapter,
    cfg: &ConfigView,
    items: &[Item],
    feature: Feature,
    dry_run: bool,
    chunk_size: usize,
    progress: &mut ProgressEmitter,
) -> Result<RemoveResult, CoreError> {
    let mut combined = RemoveResult::empty();
    combined.count = items.len();
    let total = items.len() as u64;
    let mut done = 0u64;
    for chunk in items.chunks(chunk_size.max(1)) {
        let result = adapter
            .remove(cfg, chunk, feature, dry_run)
            .await
            .map_err(|source| CoreError::Provider { provider: adapter.manifest().name.to_string(), op: "remove", source })?;
        combined.confirmed_keys.extend(result.confirmed_keys);
        combined.unresolved.extend(result.unresolved);
        done += chunk.len() as u64;
        progress.tick(done, Some(total), None, false);
    }
    combined.ok = combined.unresolved.is_empty();
    Ok(combined)
}

#[derive(Debug)]
pub struct ReconcileReport {
    pub added_to_dst: AddResult,
    pub removed_from_dst: RemoveResult,
    pub added_to_src: Option<AddResult>,
    pub removed_from_src: Option<RemoveResult>,
    pub status: String,
}

pub struct Reconciler {
    pub chunk_size: usize,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self { chunk_size: 50 }
    }
}

impl Reconciler {
    #[must_use]
    pub fn new(chunk_size: usize) -> Self {
        Self { chunk_size }
    }

    /// Runs one reconciliation pass. `state.baseline`/`state.shadow` are
    /// updated in place on success (unless `dry_run`); the caller is
    /// responsible for persisting `state` via `StateStore::save`.
    #[allow(clippy::too_many_arguments)]
    pub async fn run(
        &self,
        src: &dyn ProviderAdapter,
        src_cfg: &ConfigView,
        dst: &dyn ProviderAdapter,
        dst_cfg: &ConfigView,
        feature: Feature,
        direction: Direction,
        state: &mut PairState,
        dry_run: bool,
        progress: &mut ProgressEmitter,
    ) -> Result<ReconcileReport, CoreError> {
        validate_pair(src, dst, feature, direction)?;

        let (src_idx, dst_idx) = tokio::try_join!(build_index(src, src_cfg, feature), build_index(dst, dst_cfg, feature))?;

        let ignored: HashSet<String> =
            state.shadow.items.iter().filter(|(_, e)| e.ignored).map(|(k, _)| k.clone()).collect();

        let add_keys = keys_to_add(&src_idx, &dst_idx, &ignored);
        let remove_keys = keys_to_remove(&state.baseline.items, &dst_idx, &src_idx);
        let mut add_items: Vec<Item> = add_keys.iter().filter_map(|k| resolve_item(k, &src_idx, &dst_idx)).collect();
        let remove_items: Vec<Item> = remove_keys.iter().filter_map(|k| dst_idx.get(k).cloned()).collect();

        if direction == Direction::TwoWay {
            add_items.extend(conflict_updates(&src_idx, &dst_idx, &ignored));
        }

        let added_to_dst = apply_add(dst, dst_cfg, &add_items, feature, dry_run, self.chunk_size, progress).await?;
        let removed_from_dst = apply_remove(dst, dst_cfg, &remove_items, feature, dry_run, self.chunk_size, progress).await?;

        let (added_to_src, removed_from_src) = if direction == Direction::TwoWay {
            let add_keys_rev = keys_to_add(&dst_idx, &src_idx, &ignored);
            let remove_keys_rev = keys_to_remove(&state.baseline.items, &src_idx, &dst_idx);
            let mut add_items_rev: Vec<Item> = add_keys_rev.iter().filter_map(|k| resolve_item(k, &dst_idx, &src_idx)).collect();
            let remove_items_rev: Vec<Item> = remove_keys_rev.iter().filter_map(|k| src_idx.get(k).cloned()).collect();
            add_items_rev.extend(conflict_updates(&dst_idx, &src_idx, &ignored));

            let a = apply_add(src, src_cfg, &add_items_rev, feature, dry_run, self.chunk_size, progress).await?;
            let r = apply_remove(src, src_cfg, &remove_items_rev, feature, dry_run, self.chunk_size, progress).await?;
            (Some(a), Some(r))
        } else {
            (None, None)
        };

        let overall_ok = added_to_dst.ok
            && removed_from_dst.ok
            && added_to_src.as_ref().map_or(true, |r| r.ok)
            && removed_from_src.as_ref().map_or(true, |r| r.ok);
        progress.finish((add_items.len() + remove_items.len()) as u64, None, Some(overall_ok));

        if !dry_run {
            let mut new_baseline = src_idx.clone();
            if direction == Direction::TwoWay {
                for (k, v) in dst_idx.clone() {
                    new_baseline.entry(k).or_insert(v);
                }
            }
            state.baseline.items = new_baseline;
            record_unresolved(state, added_to_dst.unresolved.iter().chain(&removed_from_dst.unresolved));
            if let Some(a) = &added_to_src {
                record_unresolved(state, a.unresolved.iter());
            }
            if let Some(r) = &removed_from_src {
                record_unresolved(state, r.unresolved.iter());
            }
        }

        Ok(ReconcileReport { added_to_dst, removed_from_dst, added_to_src, removed_from_src, status: "ok".to_string() })
    }
}

/// Records a failed add/remove against the shadow state. The first failure
/// for a key is retried on the next run; once the same reason repeats for
/// that key it is frozen (`ignored = true`) so it's never retried again
/// within this pair scope (spec.md §8 scenario 5).
fn record_unresolved<'a>(state: &mut PairState, unresolved: impl Iterator<Item = &'a crosswatch_providers::Unresolved>) {
    for entry in unresolved {
        state
            .shadow
            .items
            .entry(entry.key.clone())
            .and_modify(|e| {
                if e.reason == entry.reason {
                    e.ignored = true;
                }
                e.attempts += 1;
                e.last_attempt = now_iso();
                e.reason = entry.reason.clone();
            })
            .or_insert_with(|| ShadowEntry {
                reason: entry.reason.clone(),
                source_ids: HashMap::new(),
                title: None,
                year: None,
                attempts: 1,
                first_seen: now_iso(),
                last_attempt: now_iso(),
                ignored: false,
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_to_add_excludes_ignored() {
        let mut src = ProviderIndex::new();
        src.insert("tmdb:1".to_string(), Item::new(crosswatch_identity::ItemType::Movie));
        src.insert("tmdb:2".to_string(), Item::new(crosswatch_identity::ItemType::Movie));
        let dst = ProviderIndex::new();
        let mut ignored = HashSet::new();
        ignored.insert("tmdb:2".to_string());

        let mut keys = keys_to_add(&src, &dst, &ignored);
        keys.sort();
        assert_eq!(keys, vec!["tmdb:1".to_string()]);
    }

    #[test]
    fn keys_to_remove_requires_baseline_and_dst_presence() {
        let mut baseline = std::collections::BTreeMap::new();
        baseline.insert("tmdb:1".to_string(), Item::new(crosswatch_identity::ItemType::Movie));
        let mut dst = ProviderIndex::new();
        dst.insert("tmdb:1".to_string(), Item::new(crosswatch_identity::ItemType::Movie));
        let src = ProviderIndex::new();

        let keys = keys_to_remove(&baseline, &dst, &src);
        assert_eq!(keys, vec!["tmdb:1".to_string()]);
    }

    #[test]
    fn resolve_item_merges_ids_from_both_sides() {
        let mut a = Item::new(crosswatch_identity::ItemType::Movie);
        a.ids.insert("tmdb".to_string(), "1".to_string());
        let mut b = Item::new(crosswatch_identity::ItemType::Movie);
        b.ids.insert("imdb".to_string(), "tt0111161".to_string());

        let mut src = ProviderIndex::new();
        src.insert("k".to_string(), a);
        let mut dst = ProviderIndex::new();
        dst.insert("k".to_string(), b);

        let merged = resolve_item("k", &src, &dst).unwrap();
        assert_eq!(merged.ids.get("tmdb"), Some(&"1".to_string()));
        assert_eq!(merged.ids.get("imdb"), Some(&"tt0111161".to_string()));
    }

    fn rated(tmdb: &str, rating: u8, rated_at: &str) -> Item {
        let mut item = Item::new(crosswatch_identity::ItemType::Movie);
        item.ids.insert("tmdb".to_string(), tmdb.to_string());
        item.rating = Some(rating);
        item.rated_at = Some(rated_at.to_string());
        item
    }

    #[test]
    fn conflict_updates_prefers_newer_rated_at() {
        let mut src = ProviderIndex::new();
        src.insert("tmdb:550".to_string(), rated("550", 8, "2024-01-01T00:00:00Z"));
        let mut dst = ProviderIndex::new();
        dst.insert("tmdb:550".to_string(), rated("550", 9, "2024-02-01T00:00:00Z"));

        let to_dst = conflict_updates(&src, &dst, &HashSet::new());
        assert!(to_dst.is_empty(), "src is older, nothing should push to dst");

        let to_src = conflict_updates(&dst, &src, &HashSet::new());
        assert_eq!(to_src.len(), 1);
        assert_eq!(to_src[0].rating, Some(9));
    }

    #[test]
    fn conflict_updates_skips_identical_values() {
        let mut src = ProviderIndex::new();
        src.insert("tmdb:1".to_string(), rated("1", 7, "2024-01-01T00:00:00Z"));
        let mut dst = ProviderIndex::new();
        dst.insert("tmdb:1".to_string(), rated("1", 7, "2024-01-01T00:00:00Z"));

        assert!(conflict_updates(&src, &dst, &HashSet::new()).is_empty());
    }

    #[test]
    fn conflict_updates_no_timestamp_takes_no_action() {
        let mut src = ProviderIndex::new();
        let mut a = Item::new(crosswatch_identity::ItemType::Movie);
        a.rating = Some(5);
        src.insert("tmdb:1".to_string(), a);
        let mut dst = ProviderIndex::new();
        let mut b = Item::new(crosswatch_identity::ItemType::Movie);
        b.rating = Some(6);
        dst.insert("tmdb:1".to_string(), b);

        assert!(conflict_updates(&src, &dst, &HashSet::new()).is_empty());
        assert!(conflict_updates(&dst, &src, &HashSet::new()).is_empty());
    }

    #[test]
    fn conflict_updates_respects_ignored_keys() {
        let mut src = ProviderIndex::new();
        src.insert("tmdb:1".to_string(), rated("1", 8, "2024-03-01T00:00:00Z"));
        let mut dst = ProviderIndex::new();
        dst.insert("tmdb:1".to_string(), rated("1", 2, "2024-01-01T00:00:00Z"));
        let mut ignored = HashSet::new();
        ignored.insert("tmdb:1".to_string());

        assert!(conflict_updates(&src, &dst, &ignored).is_empty());
    }

    #[test]
    fn record_unresolved_freezes_once_reason_repeats() {
        use crosswatch_providers::Unresolved;

        let mut state = PairState::default();
        let first = Unresolved { key: "imdb:tt9999999".to_string(), reason: "not_found".to_string(), hint: None };
        record_unresolved(&mut state, std::iter::once(&first));
        let entry = state.shadow.items.get("imdb:tt9999999").unwrap();
        assert_eq!(entry.attempts, 1);
        assert!(!entry.ignored, "a single failure is still eligible for retry");

        let second = Unresolved { key: "imdb:tt9999999".to_string(), reason: "not_found".to_string(), hint: None };
        record_unresolved(&mut state, std::iter::once(&second));
        let entry = state.shadow.items.get("imdb:tt9999999").unwrap();
        assert_eq!(entry.attempts, 2);
        assert!(entry.ignored, "the same reason repeating freezes the entry");
    }

    #[test]
    fn record_unresolved_does_not_freeze_on_changing_reason() {
        use crosswatch_providers::Unresolved;

        let mut state = PairState::default();
        let first = Unresolved { key: "imdb:tt1".to_string(), reason: "rate_limited".to_string(), hint: None };
        record_unresolved(&mut state, std::iter::once(&first));
        let second = Unresolved { key: "imdb:tt1".to_string(), reason: "network_error".to_string(), hint: None };
        record_unresolved(&mut state, std::iter::once(&second));

        assert!(!state.shadow.items.get("imdb:tt1").unwrap().ignored);
    }
}
