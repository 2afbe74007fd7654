//! Cross-provider identity: the universal [`Item`] shape and the pure
//! functions that normalize, merge, and key it so items from different
//! backends (Plex GUIDs, Trakt slugs, SIMKL/TMDb ids, ...) can be recognized
//! as the same entity.
//!
//! Nothing in this crate performs I/O; every function here is a total,
//! side-effect-free transform over plain data, which is what lets
//! `crosswatch-providers` and `crosswatch` share one notion of identity
//! without agreeing on a single source of truth for ids.

pub mod ids;
pub mod item;
pub mod key;

pub use ids::{coalesce_ids, ids_from_guid, merge_ids, normalize, EXTENDED_ID_KEYS, ID_KEYS};
pub use item::{Item, ItemType};
pub use key::{any_key_overlap, canonical_key, ids_from, keys_for_item, minimal, same_entity, title_year_key};
