//! Static adapter description and the shaped results every write op returns.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// One of the four syncable feature surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feature {
    Watchlist,
    Ratings,
    History,
    Playlists,
}

impl Feature {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Watchlist => "watchlist",
            Self::Ratings => "ratings",
            Self::History => "history",
            Self::Playlists => "playlists",
        }
    }

    pub const ALL: [Self; 4] = [Self::Watchlist, Self::Ratings, Self::History, Self::Playlists];
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a feature is compiled in and effectively enabled for this adapter.
pub type FeatureFlags = HashMap<Feature, bool>;

/// Whether `build_index` yields the full present set each call, or a stream
/// of incremental events the caller must fold itself. Every adapter in this
/// crate implements `Present`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexSemantics {
    Present,
    Events,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RatingsTypes {
    pub movies: bool,
    pub shows: bool,
    pub seasons: bool,
    pub episodes: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatingsCapability {
    pub types: RatingsTypes,
    pub upsert: bool,
    pub unrate: bool,
    pub from_date: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ratings: Option<RatingsCapability>,
    pub index_semantics: IndexSemantics,
    /// Whether the vendor can observe deletions directly (if not, the
    /// Reconciler must infer them from baseline diffs).
    pub observed_deletes: bool,
    /// `false` for read-only adapters (e.g. Tautulli): `add`/`remove` always
    /// fail with `ProviderError::ReadOnly`.
    pub can_target: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            ratings: None,
            index_semantics: IndexSemantics::Present,
            observed_deletes: true,
            can_target: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub name: &'static str,
    pub label: &'static str,
    pub version: &'static str,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub bidirectional: bool,
    pub features: Vec<Feature>,
    pub requires: Vec<&'static str>,
    pub capabilities: Capabilities,
}

/// An item that couldn't be applied this run; carries a stable reason and
/// optional machine hint (§7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Unresolved {
    pub key: String,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddResult {
    pub ok: bool,
    pub count: usize,
    pub confirmed_keys: Vec<String>,
    pub skipped_keys: Vec<String>,
    pub unresolved: Vec<Unresolved>,
}

impl AddResult {
    #[must_use]
    pub fn read_only() -> Self {
        Self {
            ok: false,
            count: 0,
            confirmed_keys: Vec::new(),
            skipped_keys: Vec::new(),
            unresolved: Vec::new(),
        }
    }

    #[must_use]
    pub fn empty() -> Self {
        Self {
            ok: true,
            count: 0,
            confirmed_keys: Vec::new(),
            skipped_keys: Vec::new(),
            unresolved: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveResult {
    pub ok: bool,
    pub count: usize,
    pub confirmed_keys: Vec<String>,
    pub unresolved: Vec<Unresolved>,
}

impl RemoveResult {
    #[must_use]
    pub fn read_only() -> Self {
        Self {
            ok: false,
            count: 0,
            confirmed_keys: Vec::new(),
            unresolved: Vec::new(),
        }
    }

    #[must_use]
    pub fn empty() -> Self {
        Self {
            ok: true,
            count: 0,
            confirmed_keys: Vec::new(),
            unresolved: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiHealth {
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate: Option<crate::http::RateLimit>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_s: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub ok: bool,
    pub status: String,
    pub latency_ms: u64,
    pub features: HashMap<String, bool>,
    pub details: HealthDetails,
    pub api: HashMap<String, ApiHealth>,
}

impl HealthReport {
    #[must_use]
    pub fn not_configured() -> Self {
        Self {
            ok: false,
            status: "not_configured".to_string(),
            latency_ms: 0,
            features: HashMap::new(),
            details: HealthDetails {
                reason: Some("missing_config".to_string()),
                retry_after_s: None,
            },
            api: HashMap::new(),
        }
    }
}
