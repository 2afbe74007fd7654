//! End-to-end pair-sync scenarios, exercised against two `LocalAdapter`
//! instances (distinct store directories stand in for distinct provider
//! instances) so the tests don't depend on any vendor network mock.

use async_trait::async_trait;
use crosswatch::config::{ConfigView, Direction};
use crosswatch::state::PairState;
use crosswatch::{ProgressEmitter, Reconciler};
use crosswatch_identity::{Item, ItemType};
use crosswatch_providers::{
    AddResult, Capabilities, Feature, HealthReport, IndexSemantics, LocalAdapter, Manifest, ProviderAdapter,
    ProviderError, ProviderIndex, RemoveResult, Unresolved,
};
use serde_json::Value;

fn local_cfg(dir: &std::path::Path, name: &str) -> ConfigView {
    let mut cfg = ConfigView::new();
    cfg.insert("store_dir".to_string(), Value::String(dir.join(name).to_string_lossy().to_string()));
    cfg
}

fn movie(imdb: &str) -> Item {
    let mut item = Item::new(ItemType::Movie);
    item.ids.insert("imdb".to_string(), imdb.to_string());
    item
}

/// Stands in for a vendor whose write endpoint always reports the item as
/// unresolvable (MDBList's `not_found` batch-add response, §8 scenario 5).
struct AlwaysNotFoundAdapter;

#[async_trait]
impl ProviderAdapter for AlwaysNotFoundAdapter {
    fn manifest(&self) -> Manifest {
        Manifest {
            name: "fake-not-found",
            label: "Fake not-found vendor",
            version: "1.0.0",
            kind: "sync",
            bidirectional: true,
            features: vec![Feature::Watchlist],
            requires: vec![],
            capabilities: Capabilities {
                ratings: None,
                index_semantics: IndexSemantics::Present,
                observed_deletes: true,
                can_target: true,
            },
        }
    }

    fn is_configured(&self, _cfg: &ConfigView) -> bool {
        true
    }

    async fn health(&self, _cfg: &ConfigView) -> HealthReport {
        HealthReport::not_configured()
    }

    async fn build_index(&self, _cfg: &ConfigView, _feature: Feature) -> Result<ProviderIndex, ProviderError> {
        Ok(ProviderIndex::new())
    }

    async fn add(
        &self,
        _cfg: &ConfigView,
        items: &[Item],
        _feature: Feature,
        _dry_run: bool,
    ) -> Result<AddResult, ProviderError> {
        let mut result = AddResult::empty();
        result.count = items.len();
        for item in items {
            result.unresolved.push(Unresolved {
                key: crosswatch_identity::canonical_key(item),
                reason: "not_found".to_string(),
                hint: Some("not-found".to_string()),
            });
        }
        Ok(result)
    }

    async fn remove(
        &self,
        _cfg: &ConfigView,
        items: &[Item],
        _feature: Feature,
        _dry_run: bool,
    ) -> Result<RemoveResult, ProviderError> {
        let mut result = RemoveResult::empty();
        result.count = items.len();
        Ok(result)
    }
}

#[tokio::test]
async fn watchlist_mirror_fresh_run_adds_to_destination() {
    let dir = tempfile::tempdir().unwrap();
    let src = LocalAdapter::new();
    let dst = LocalAdapter::new();
    let src_cfg = local_cfg(dir.path(), "src");
    let dst_cfg = local_cfg(dir.path(), "dst");

    src.add(&src_cfg, &[movie("tt0111161")], Feature::Watchlist, false).await.unwrap();

    let mut state = PairState::default();
    let mut progress = ProgressEmitter::new("dst", "watchlist");
    let reconciler = Reconciler::default();

    let report = reconciler
        .run(&src, &src_cfg, &dst, &dst_cfg, Feature::Watchlist, Direction::Mirror, &mut state, false, &mut progress)
        .await
        .unwrap();

    assert_eq!(report.added_to_dst.count, 1);
    assert_eq!(report.removed_from_dst.count, 0);
    assert!(report.added_to_src.is_none());

    let dst_idx = dst.build_index(&dst_cfg, Feature::Watchlist).await.unwrap();
    assert!(dst_idx.keys().any(|k| state.baseline.items.contains_key(k)));
    assert!(state.baseline.items.values().any(|item| item.ids.get("imdb").map(String::as_str) == Some("tt0111161")));
    assert_eq!(dst_idx.len(), 1);
}

#[tokio::test]
async fn observed_delete_propagates_in_mirror_mode() {
    let dir = tempfile::tempdir().unwrap();
    let src = LocalAdapter::new();
    let dst = LocalAdapter::new();
    let src_cfg = local_cfg(dir.path(), "src");
    let dst_cfg = local_cfg(dir.path(), "dst");

    src.add(&src_cfg, &[movie("tt0111161")], Feature::Watchlist, false).await.unwrap();

    let mut state = PairState::default();
    let reconciler = Reconciler::default();
    reconciler
        .run(&src, &src_cfg, &dst, &dst_cfg, Feature::Watchlist, Direction::Mirror, &mut state, false, &mut ProgressEmitter::new("dst", "watchlist"))
        .await
        .unwrap();
    assert_eq!(dst.build_index(&dst_cfg, Feature::Watchlist).await.unwrap().len(), 1);

    src.remove(&src_cfg, &[movie("tt0111161")], Feature::Watchlist, false).await.unwrap();

    let report = reconciler
        .run(&src, &src_cfg, &dst, &dst_cfg, Feature::Watchlist, Direction::Mirror, &mut state, false, &mut ProgressEmitter::new("dst", "watchlist"))
        .await
        .unwrap();

    assert_eq!(report.added_to_dst.count, 0);
    assert_eq!(report.removed_from_dst.count, 1);
    assert!(dst.build_index(&dst_cfg, Feature::Watchlist).await.unwrap().is_empty());
    assert!(state.baseline.items.is_empty());
}

#[tokio::test]
async fn two_way_conflict_resolved_by_rated_at() {
    let dir = tempfile::tempdir().unwrap();
    let a = LocalAdapter::new();
    let b = LocalAdapter::new();
    let a_cfg = local_cfg(dir.path(), "a");
    let b_cfg = local_cfg(dir.path(), "b");

    let mut early = Item::new(ItemType::Movie);
    early.ids.insert("tmdb".to_string(), "550".to_string());
    early.rating = Some(8);
    early.rated_at = Some("2024-01-01T00:00:00Z".to_string());
    a.add(&a_cfg, &[early], Feature::Ratings, false).await.unwrap();

    let mut later = Item::new(ItemType::Movie);
    later.ids.insert("tmdb".to_string(), "550".to_string());
    later.rating = Some(9);
    later.rated_at = Some("2024-02-01T00:00:00Z".to_string());
    b.add(&b_cfg, &[later], Feature::Ratings, false).await.unwrap();

    let mut state = PairState::default();
    let reconciler = Reconciler::default();
    reconciler
        .run(&a, &a_cfg, &b, &b_cfg, Feature::Ratings, Direction::TwoWay, &mut state, false, &mut ProgressEmitter::new("b", "ratings"))
        .await
        .unwrap();

    let a_idx = a.build_index(&a_cfg, Feature::Ratings).await.unwrap();
    let b_idx = b.build_index(&b_cfg, Feature::Ratings).await.unwrap();

    assert!(a_idx.values().all(|item| item.rating == Some(9)));
    assert!(b_idx.values().all(|item| item.rating == Some(9)));
}

#[tokio::test]
async fn not_found_item_freezes_after_a_repeated_failure() {
    let dir = tempfile::tempdir().unwrap();
    let src = LocalAdapter::new();
    let dst = AlwaysNotFoundAdapter;
    let src_cfg = local_cfg(dir.path(), "src");
    let dst_cfg = ConfigView::new();

    src.add(&src_cfg, &[movie("tt9999999")], Feature::Watchlist, false).await.unwrap();

    let mut state = PairState::default();
    let reconciler = Reconciler::default();

    let first = reconciler
        .run(&src, &src_cfg, &dst, &dst_cfg, Feature::Watchlist, Direction::Mirror, &mut state, false, &mut ProgressEmitter::new("dst", "watchlist"))
        .await
        .unwrap();
    assert_eq!(first.added_to_dst.unresolved.len(), 1);
    let key = &first.added_to_dst.unresolved[0].key;
    assert_eq!(state.shadow.items.get(key).unwrap().reason, "not_found");
    assert!(!state.shadow.items.get(key).unwrap().ignored, "first failure is still retried");

    let second = reconciler
        .run(&src, &src_cfg, &dst, &dst_cfg, Feature::Watchlist, Direction::Mirror, &mut state, false, &mut ProgressEmitter::new("dst", "watchlist"))
        .await
        .unwrap();
    assert_eq!(second.added_to_dst.unresolved.len(), 1, "the identical failure repeats once more");
    assert!(state.shadow.items.get(key).unwrap().ignored, "repeating the same reason freezes the entry");

    let third = reconciler
        .run(&src, &src_cfg, &dst, &dst_cfg, Feature::Watchlist, Direction::Mirror, &mut state, false, &mut ProgressEmitter::new("dst", "watchlist"))
        .await
        .unwrap();
    assert_eq!(third.added_to_dst.count, 0, "a follow-up identical add is skipped once frozen");
}
