//! Per-pair scoped persistence: baselines (the last reconciled index) and
//! shadow entries (unresolved/ignored items), addressed by a sanitized pair
//! scope string and written atomically.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use crosswatch_identity::Item;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

const DISABLED_SCOPES: &[&str] = &["unscoped", "default", "none"];

/// `[^A-Za-z0-9._-]` folds to `_`, runs of `_` collapse, result is truncated
/// to 96 chars; an empty result falls back to `"default"`.
#[must_use]
pub fn sanitize_pair_scope(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_was_underscore = false;
    for ch in raw.trim().chars() {
        let mapped = if ch.is_ascii_alphanumeric() || ch == '.' || ch == '-' || ch == '_' { ch } else { '_' };
        if mapped == '_' {
            if last_was_underscore {
                continue;
            }
            last_was_underscore = true;
        } else {
            last_was_underscore = false;
        }
        out.push(mapped);
    }
    let trimmed = out.trim_matches('_');
    let truncated: String = trimmed.chars().take(96).collect();
    if truncated.is_empty() {
        "default".to_string()
    } else {
        truncated
    }
}

/// A pair scope of `"unscoped"`/`"default"`/`"none"` (any case) or blank
/// disables persistence entirely: reads return empty state, writes no-op.
#[must_use]
pub fn scope_disables_persistence(scope: &str) -> bool {
    let trimmed = scope.trim();
    trimmed.is_empty() || DISABLED_SCOPES.iter().any(|d| trimmed.eq_ignore_ascii_case(d))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShadowEntry {
    pub reason: String,
    #[serde(default)]
    pub source_ids: HashMap<String, String>,
    pub title: Option<String>,
    pub year: Option<i32>,
    #[serde(default)]
    pub attempts: u32,
    pub first_seen: String,
    pub last_attempt: String,
    /// Survives index rebuilds; surfaces as a read-only row rather than being
    /// re-added or re-attempted.
    #[serde(default)]
    pub ignored: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BaselineState {
    #[serde(default)]
    pub items: BTreeMap<String, Item>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShadowState {
    #[serde(default)]
    pub items: BTreeMap<String, ShadowEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PairState {
    #[serde(default)]
    pub baseline: BaselineState,
    #[serde(default)]
    pub shadow: ShadowState,
    pub watermark: Option<String>,
}

pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn scoped_path(&self, scope: &str) -> PathBuf {
        self.dir.join(format!("pairstate.{}.json", sanitize_pair_scope(scope)))
    }

    fn legacy_path(&self) -> PathBuf {
        self.dir.join("pairstate.json")
    }

    /// Loads the state for `scope`. Returns an empty `PairState` when the
    /// scope disables persistence, when no file exists yet, or (after
    /// migrating) when the legacy unscoped file is also absent.
    pub fn load(&self, scope: &str) -> Result<PairState, CoreError> {
        if scope_disables_persistence(scope) {
            return Ok(PairState::default());
        }

        let scoped = self.scoped_path(scope);
        if scoped.exists() {
            return read_json(&scoped);
        }

        // Legacy unscoped file: migrate it into the scoped path on first read.
        let legacy = self.legacy_path();
        if legacy.exists() {
            let state: PairState = read_json(&legacy)?;
            self.save(scope, &state)?;
            std::fs::remove_file(&legacy).map_err(CoreError::Io)?;
            return Ok(state);
        }

        Ok(PairState::default())
    }

    /// Writes `state` atomically (`<final>.tmp` then rename) unless `scope`
    /// disables persistence.
    pub fn save(&self, scope: &str, state: &PairState) -> Result<(), CoreError> {
        if scope_disables_persistence(scope) {
            return Ok(());
        }
        std::fs::create_dir_all(&self.dir).map_err(CoreError::Io)?;
        let path = self.scoped_path(scope);
        write_json_atomic(&path, state)
    }
}

fn read_json<T: for<'de> Deserialize<'de> + Default>(path: &Path) -> Result<T, CoreError> {
    let bytes = std::fs::read(path).map_err(CoreError::Io)?;
    serde_json::from_slice(&bytes).map_err(CoreError::Serialization)
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
    fn sanitize_pair_scope_folds_unsafe_chars() {
        assert_eq!(sanitize_pair_scope("plex:default / trakt:default"), "plex_default_trakt_default");
        assert_eq!(sanitize_pair_scope(""), "default");
        assert_eq!(sanitize_pair_scope("   "), "default");
    }

    #[test]
    fn sanitize_pair_scope_truncates_to_96_chars() {
        let long = "a".repeat(200);
        assert_eq!(sanitize_pair_scope(&long).len(), 96);
    }

    #[test]
    fn scope_disables_persistence_recognizes_reserved_names() {
        assert!(scope_disables_persistence(""));
        assert!(scope_disables_persistence("default"));
        assert!(scope_disables_persistence("UNSCOPED"));
        assert!(scope_disables_persistence("none"));
        assert!(!scope_disables_persistence("plex.default__trakt.default"));
    }

    #[test]
    fn disabled_scope_reads_and_writes_are_noops() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let state = PairState::default();
        store.save("default", &state).unwrap();
        assert!(!dir.path().join("pairstate.default.json").exists());
        let loaded = store.load("default").unwrap();
        assert!(loaded.baseline.items.is_empty());
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let mut state = PairState::default();
        state.watermark = Some("2026-01-01T00:00:00Z".to_string());

        store.save("plex.default__trakt.default", &state).unwrap();
        let loaded = store.load("plex.default__trakt.default").unwrap();
        assert_eq!(loaded.watermark, state.watermark);
    }

    #[test]
    fn legacy_unscoped_file_is_migrated_on_first_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let mut state = PairState::default();
        state.watermark = Some("legacy".to_string());
        std::fs::write(dir.path().join("pairstate.json"), serde_json::to_vec(&state).unwrap()).unwrap();

        let loaded = store.load("plex.default__trakt.default").unwrap();
        assert_eq!(loaded.watermark, Some("legacy".to_string()));
        assert!(!dir.path().join("pairstate.json").exists());
        assert!(dir.path().join("pairstate.plex.default__trakt.default.json").exists());
    }
}
