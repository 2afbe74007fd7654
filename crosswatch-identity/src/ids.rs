//! ID normalization and GUID parsing.
//!
//! Ground truth: `examples/original_source/providers/cw_platform/id_map.py`.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

/// Recognized ID kinds, in canonical-key priority order. `simkl` sorts
/// last, matching the original's `_KEY_PRIORITY` tuple.
pub const ID_KEYS: &[&str] = &[
    "tmdb", "imdb", "tvdb", "trakt", "plex", "guid", "slug", "simkl",
];

/// Kinds recognized by `normalize` beyond the canonical-priority set:
/// anime-specific and vendor-opaque identifiers that participate in
/// key-overlap matching but never win canonical-key selection over the
/// ids above (they are still included in `keys_for_item`'s comparable set).
pub const EXTENDED_ID_KEYS: &[&str] = &["anilist", "mal", "jellyfin", "emby"];

fn norm_str(v: &str) -> Option<String> {
    let s = v.trim();
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

fn digits_only(s: &str) -> Option<String> {
    let d: String = s.chars().filter(char::is_ascii_digit).collect();
    if d.is_empty() {
        None
    } else {
        Some(d)
    }
}

/// Normalize a raw ID value for the given `kind`. Returns `None` for blank
/// or uninterpretable input.
#[must_use]
pub fn normalize(kind: &str, raw: &str) -> Option<String> {
    let k = kind.to_ascii_lowercase();
    let s = norm_str(raw)?;

    match k.as_str() {
        "tmdb" | "tvdb" | "trakt" | "simkl" | "anilist" | "mal" => digits_only(&s),
        "imdb" => {
            let lower = s.to_ascii_lowercase();
            if lower.starts_with("tt") && lower.chars().any(|c| c.is_ascii_digit()) {
                Some(lower)
            } else {
                digits_only(&lower).map(|d| format!("tt{d}"))
            }
        }
        "slug" => Some(s.to_ascii_lowercase()),
        "plex" => digits_only(&s).or(Some(s)),
        "guid" => Some(trim_guid(&s)),
        // jellyfin/emby ItemIds, and any unrecognized kind: opaque passthrough.
        _ => Some(s),
    }
}

/// Trims a GUID of query string and fragment before comparison.
fn trim_guid(s: &str) -> String {
    let s = s.split('#').next().unwrap_or(s);
    let s = s.split('?').next().unwrap_or(s);
    s.to_string()
}

struct GuidPattern {
    re: &'static LazyLock<Regex>,
    kind: &'static str,
}

static RE_PLEX_IMDB: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)com\.plexapp\.agents\.imdb://(tt\d+)").unwrap());
static RE_PLEX_TMDB: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)com\.plexapp\.agents\.themoviedb://(\d+)").unwrap());
static RE_PLEX_TVDB: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)com\.plexapp\.agents\.thetvdb://(\d+)").unwrap());
static RE_IMDB: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)imdb://(tt\d+)").unwrap());
static RE_TMDB: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)tmdb://(\d+)").unwrap());
static RE_TVDB: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)tvdb://(\d+)").unwrap());
static RE_PLEX_SCHEME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^plex://").unwrap());

/// Extract `{imdb,tmdb,tvdb,guid}` ids embedded in a Plex GUID string.
/// Recognizes legacy `com.plexapp.agents.*` agents, bare `imdb://`/`tmdb://`/
/// `tvdb://` schemes, and the newer opaque `plex://` scheme (preserved
/// as-is under `guid`).
#[must_use]
pub fn ids_from_guid(guid: Option<&str>) -> HashMap<String, String> {
    let mut out = HashMap::new();
    let Some(g) = guid.and_then(|g| norm_str(g)) else {
        return out;
    };

    let patterns: &[GuidPattern] = &[
        GuidPattern { re: &RE_PLEX_IMDB, kind: "imdb" },
        GuidPattern { re: &RE_PLEX_TMDB, kind: "tmdb" },
        GuidPattern { re: &RE_PLEX_TVDB, kind: "tvdb" },
        GuidPattern { re: &RE_IMDB, kind: "imdb" },
        GuidPattern { re: &RE_TMDB, kind: "tmdb" },
        GuidPattern { re: &RE_TVDB, kind: "tvdb" },
    ];

    for p in patterns {
        if let Some(caps) = p.re.captures(&g) {
            if let Some(m) = caps.get(1) {
                if let Some(norm) = normalize(p.kind, m.as_str()) {
                    out.entry(p.kind.to_string()).or_insert(norm);
                }
            }
        }
    }

    if RE_PLEX_SCHEME.is_match(&g) {
        out.insert("guid".to_string(), g.clone());
    }

    out
}

/// Merge several raw id maps into one normalized map. Earlier maps win on
/// collisions (first-seen-wins across the arguments, in order).
#[must_use]
pub fn coalesce_ids<'a, I>(maps: I) -> HashMap<String, String>
where
    I: IntoIterator<Item = &'a HashMap<String, String>>,
{
    let mut out = HashMap::new();
    let all_keys: Vec<&str> = ID_KEYS.iter().chain(EXTENDED_ID_KEYS.iter()).copied().collect();
    for raw in maps {
        for k in &all_keys {
            if out.contains_key(*k) {
                continue;
            }
            if let Some(v) = raw.get(*k).and_then(|v| normalize(k, v)) {
                out.insert((*k).to_string(), v);
            }
        }
    }
    out
}

/// Merge two id maps: `primary` wins on collisions, `secondary` fills gaps.
/// Output is normalized; `None`/unparseable values are dropped.
#[must_use]
pub fn merge_ids(
    primary: &HashMap<String, String>,
    secondary: &HashMap<String, String>,
) -> HashMap<String, String> {
    let all_keys: Vec<&str> = ID_KEYS.iter().chain(EXTENDED_ID_KEYS.iter()).copied().collect();
    let mut out = HashMap::new();
    for k in all_keys {
        let p = primary.get(k).and_then(|v| normalize(k, v));
        let s = secondary.get(k).and_then(|v| normalize(k, v));
        if let Some(v) = p.or(s) {
            out.insert(k.to_string(), v);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn imdb_bare_digits_promoted() {
        assert_eq!(normalize("imdb", "111161"), Some("tt111161".to_string()));
        assert_eq!(normalize("imdb", "tt0111161"), Some("tt0111161".to_string()));
        assert_eq!(normalize("imdb", "TT0111161"), Some("tt0111161".to_string()));
    }

    #[test]
    fn numeric_ids_strip_non_digits() {
        assert_eq!(normalize("tmdb", "550"), Some("550".to_string()));
        assert_eq!(normalize("tvdb", "abc-123"), Some("123".to_string()));
        assert_eq!(normalize("trakt", ""), None);
    }

    #[test]
    fn slug_is_lowercased() {
        assert_eq!(normalize("slug", "Fight-Club"), Some("fight-club".to_string()));
    }

    #[test]
    fn guid_trims_query_and_fragment() {
        assert_eq!(
            normalize("guid", "plex://movie/abc?context=foo#frag"),
            Some("plex://movie/abc".to_string())
        );
    }

    #[test]
    fn guid_extracts_legacy_plex_agents() {
        let ids = ids_from_guid(Some("com.plexapp.agents.imdb://tt0111161?lang=en"));
        assert_eq!(ids.get("imdb"), Some(&"tt0111161".to_string()));

        let ids = ids_from_guid(Some("com.plexapp.agents.themoviedb://550?lang=en"));
        assert_eq!(ids.get("tmdb"), Some(&"550".to_string()));
    }

    #[test]
    fn guid_extracts_bare_schemes() {
        let ids = ids_from_guid(Some("tmdb://550"));
        assert_eq!(ids.get("tmdb"), Some(&"550".to_string()));
    }

    #[test]
    fn guid_keeps_opaque_plex_scheme() {
        let ids = ids_from_guid(Some("plex://movie/5d7768ba96b655001fdc0d27"));
        assert_eq!(
            ids.get("guid"),
            Some(&"plex://movie/5d7768ba96b655001fdc0d27".to_string())
        );
    }

    #[test]
    fn merge_ids_primary_wins() {
        let mut primary = HashMap::new();
        primary.insert("imdb".to_string(), "tt1".to_string());
        let mut secondary = HashMap::new();
        secondary.insert("imdb".to_string(), "tt2".to_string());
        secondary.insert("tmdb".to_string(), "42".to_string());

        let merged = merge_ids(&primary, &secondary);
        assert_eq!(merged.get("imdb"), Some(&"tt1".to_string()));
        assert_eq!(merged.get("tmdb"), Some(&"42".to_string()));
    }
}
