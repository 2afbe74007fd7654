//! Orchestration layer: configuration, provider registry, reconciliation,
//! snapshots, and the state/progress plumbing that ties them together. The
//! binary in `src/bin/crosswatch.rs` is a thin driver over this crate.

pub mod config;
pub mod error;
pub mod logging;
pub mod progress;
pub mod reconcile;
pub mod registry;
pub mod resilience;
pub mod snapshot;
pub mod state;

pub use config::Config;
pub use error::{CoreError, Result};
pub use progress::{ProgressEmitter, ProgressEvent};
pub use reconcile::{ReconcileReport, Reconciler};
pub use registry::ManifestRegistry;
pub use snapshot::Snapshotter;
pub use state::{PairState, StateStore};
