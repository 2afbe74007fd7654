//! Vendor adapters implementing the uniform [`ProviderAdapter`] surface:
//! Plex, Jellyfin/Emby, Trakt, SIMKL, MDBList, TMDb, AniList, Tautulli, and
//! the authoritative local CrossWatch store. Identity and key matching live
//! in `crosswatch-identity`; this crate only knows how to talk to each
//! vendor's wire format and map it to/from [`crosswatch_identity::Item`].

pub mod anilist;
pub mod cfgutil;
pub mod error;
pub mod http;
pub mod jellyfin_emby;
pub mod local;
pub mod manifest;
pub mod mdblist;
pub mod plex;
pub mod simkl;
pub mod tautulli;
pub mod tmdb;
pub mod traits;
pub mod trakt;

pub use anilist::AnilistAdapter;
pub use error::ProviderError;
pub use jellyfin_emby::{JellyfinEmbyAdapter, Vendor as JellyfinEmbyVendor};
pub use local::LocalAdapter;
pub use manifest::{
    AddResult, ApiHealth, Capabilities, Feature, FeatureFlags, HealthDetails, HealthReport,
    IndexSemantics, Manifest, RatingsCapability, RatingsTypes, RemoveResult, Unresolved,
};
pub use mdblist::MdblistAdapter;
pub use plex::PlexAdapter;
pub use simkl::SimklAdapter;
pub use tautulli::TautulliAdapter;
pub use tmdb::TmdbAdapter;
pub use trakt::TraktAdapter;

pub use traits::{probe_via_build_index, ConfigView, ProviderAdapter, ProviderIndex};

/// Builds one boxed adapter per backend, keyed by [`Manifest::name`]. The
/// Reconciler looks adapters up by this name when resolving a pair's two
/// provider instances against their configured kinds.
#[must_use]
pub fn all_adapters() -> Vec<Box<dyn ProviderAdapter>> {
    vec![
        Box::new(PlexAdapter::new()),
        Box::new(JellyfinEmbyAdapter::new(JellyfinEmbyVendor::Jellyfin)),
        Box::new(JellyfinEmbyAdapter::new(JellyfinEmbyVendor::Emby)),
        Box::new(TraktAdapter::new()),
        Box::new(SimklAdapter::new()),
        Box::new(MdblistAdapter::new()),
        Box::new(TmdbAdapter::new()),
        Box::new(AnilistAdapter::new()),
        Box::new(TautulliAdapter::new()),
        Box::new(LocalAdapter::new()),
    ]
}
