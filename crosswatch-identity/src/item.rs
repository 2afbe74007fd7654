//! The universal item representation shared by every provider adapter.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Kind of entity an [`Item`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Movie,
    Show,
    Season,
    Episode,
    Anime,
}

impl ItemType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Movie => "movie",
            Self::Show => "show",
            Self::Season => "season",
            Self::Episode => "episode",
            Self::Anime => "anime",
        }
    }

    /// Coarse bucket used for snapshot stats (`movie` vs `tv`), matching
    /// the original `_type_of_item` classifier.
    #[must_use]
    pub const fn stats_bucket(self) -> &'static str {
        match self {
            Self::Movie => "movie",
            Self::Show | Self::Season | Self::Episode | Self::Anime => "tv",
        }
    }
}

/// A single cross-provider media item: a movie, show, season, episode, or
/// anime entry, plus whatever feature payload (rating, watch timestamp,
/// episode coordinates) the producing feature attaches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    #[serde(rename = "type")]
    pub item_type: ItemType,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,

    #[serde(default)]
    pub ids: HashMap<String, String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<u8>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rated_at: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub watched_at: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub season: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub episode: Option<u32>,

    /// Show-level IDs, carried separately when `self` is an episode/season.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub show_ids: HashMap<String, String>,

    /// Opaque provider-private substructure (e.g. `anilist.list_entry_id`).
    /// Never interpreted outside the owning adapter.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub provider_data: serde_json::Map<String, serde_json::Value>,
}

impl Item {
    #[must_use]
    pub fn new(item_type: ItemType) -> Self {
        Self {
            item_type,
            title: None,
            year: None,
            ids: HashMap::new(),
            rating: None,
            rated_at: None,
            watched_at: None,
            season: None,
            episode: None,
            show_ids: HashMap::new(),
            provider_data: serde_json::Map::new(),
        }
    }

    #[must_use]
    pub fn is_episode_scoped(&self) -> bool {
        matches!(self.item_type, ItemType::Episode | ItemType::Season)
    }
}
