//! Canonical keys and key-set comparisons.
//!
//! Ground truth: `examples/original_source/providers/cw_platform/id_map.py`
//! (`canonical_key`, `keys_for_item`, `any_key_overlap`).

use std::collections::{HashMap, HashSet};

use crate::ids::{coalesce_ids, ids_from_guid, normalize, EXTENDED_ID_KEYS, ID_KEYS};
use crate::item::Item;

/// Collects and normalizes every id on an item: its own `ids` map merged
/// with any ids embedded in a `guid` value.
#[must_use]
pub fn ids_from(item: &Item) -> HashMap<String, String> {
    let guid_ids = ids_from_guid(item.ids.get("guid").map(String::as_str));
    coalesce_ids([&item.ids, &guid_ids])
}

/// `"<type>|title:<lower title>|year:<year-or-empty>"`, or `None` when the
/// item has no title.
#[must_use]
pub fn title_year_key(item: &Item) -> Option<String> {
    let title = item.title.as_deref()?.trim();
    if title.is_empty() {
        return None;
    }
    let year = item.year.map_or_else(String::new, |y| y.to_string());
    Some(format!(
        "{}|title:{}|year:{}",
        item.item_type.as_str(),
        title.to_ascii_lowercase(),
        year
    ))
}

fn pick_by_priority(idmap: &HashMap<String, String>) -> Option<(String, String)> {
    for k in ID_KEYS {
        if let Some(v) = idmap.get(*k) {
            return Some(((*k).to_string(), v.clone()));
        }
    }
    None
}

/// Episode/season items whose own IDs don't resolve fall back to a key
/// synthesized from the show's IDs plus season/episode coordinates, per
/// spec.md §4.1 ("Edge cases").
fn synth_episode_key(item: &Item) -> Option<String> {
    if !item.is_episode_scoped() {
        return None;
    }
    let show_idmap: HashMap<String, String> = item
        .show_ids
        .iter()
        .filter_map(|(k, v)| normalize(k, v).map(|v| (k.clone(), v)))
        .collect();
    let (kind, value) = pick_by_priority(&show_idmap)?;
    let season = item.season?;
    let episode = item.episode?;
    Some(format!("{kind}:{value}|s{season:02}e{episode:02}"))
}

/// The single deterministic identifier chosen for an item: IDs by
/// priority (`tmdb > imdb > tvdb > trakt > plex > guid > slug > simkl`),
/// else an episode-scoped synthesis, else `type|title|year`.
#[must_use]
pub fn canonical_key(item: &Item) -> String {
    let idmap = ids_from(item);
    if let Some((kind, value)) = pick_by_priority(&idmap) {
        return format!("{kind}:{value}").to_ascii_lowercase();
    }
    if let Some(k) = synth_episode_key(item) {
        return k;
    }
    title_year_key(item).unwrap_or_else(|| "unknown:".to_string())
}

/// Every normalized `kind:value` key plus the `type|title|year` key —
/// the full comparable key set used for overlap matching.
#[must_use]
pub fn keys_for_item(item: &Item) -> HashSet<String> {
    let idmap = ids_from(item);
    let mut out: HashSet<String> = ID_KEYS
        .iter()
        .chain(EXTENDED_ID_KEYS.iter())
        .filter_map(|k| idmap.get(*k).map(|v| format!("{k}:{v}").to_ascii_lowercase()))
        .collect();
    if let Some(ty) = title_year_key(item) {
        out.insert(ty);
    }
    out
}

/// Set-intersection test; reflexive and symmetric (P5).
#[must_use]
pub fn any_key_overlap(a: &HashSet<String>, b: &HashSet<String>) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    a.intersection(b).next().is_some()
}

/// Two items are the same entity iff their comparable key sets overlap.
#[must_use]
pub fn same_entity(a: &Item, b: &Item) -> bool {
    any_key_overlap(&keys_for_item(a), &keys_for_item(b))
}

/// Compact, normalized projection of an item: `{ids, type, title, year}`
/// plus passthrough of rating/rated_at/watched_at when present. Safe for
/// logs, diffs, and UIs.
#[must_use]
pub fn minimal(item: &Item) -> Item {
    let mut out = Item::new(item.item_type);
    out.ids = ids_from(item);
    out.title = item.title.clone();
    out.year = item.year;
    out.rating = item.rating;
    out.rated_at = item.rated_at.clone();
    out.watched_at = item.watched_at.clone();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::ItemType;

    fn movie(imdb: Option<&str>, tmdb: Option<&str>, title: &str, year: i32) -> Item {
        let mut it = Item::new(ItemType::Movie);
        it.title = Some(title.to_string());
        it.year = Some(year);
        if let Some(v) = imdb {
            it.ids.insert("imdb".to_string(), v.to_string());
        }
        if let Some(v) = tmdb {
            it.ids.insert("tmdb".to_string(), v.to_string());
        }
        it
    }

    #[test]
    fn tmdb_wins_over_imdb() {
        let it = movie(Some("tt0111161"), Some("278"), "The Shawshank Redemption", 1994);
        assert_eq!(canonical_key(&it), "tmdb:278");
    }

    #[test]
    fn falls_back_to_title_year_without_ids() {
        let it = movie(None, None, "Some Obscure Film", 2001);
        assert_eq!(canonical_key(&it), "movie|title:some obscure film|year:2001");
    }

    #[test]
    fn canonical_key_is_stable_under_double_normalization() {
        // P4: canonical_key(normalize(i)) == canonical_key(normalize(normalize(i)))
        let it = movie(Some("0111161"), None, "x", 2000);
        let k1 = canonical_key(&it);
        let mut it2 = it.clone();
        it2.ids = ids_from(&it2);
        let k2 = canonical_key(&it2);
        assert_eq!(k1, k2);
    }

    #[test]
    fn overlap_is_reflexive_and_symmetric() {
        let a = movie(Some("tt1"), None, "a", 2000);
        let b = movie(Some("tt1"), Some("5"), "b", 1999);
        let ka = keys_for_item(&a);
        let kb = keys_for_item(&b);
        assert!(any_key_overlap(&ka, &kb));
        assert!(any_key_overlap(&kb, &ka));
        assert!(any_key_overlap(&ka, &ka));
    }

    #[test]
    fn episode_falls_back_to_show_plus_coordinates() {
        let mut it = Item::new(ItemType::Episode);
        it.season = Some(2);
        it.episode = Some(5);
        it.show_ids.insert("tvdb".to_string(), "81189".to_string());
        assert_eq!(canonical_key(&it), "tvdb:81189|s02e05");
    }
}
