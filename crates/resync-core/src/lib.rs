//! resync core library: keeps a remote code-analysis service in sync with a
//! project's files and caches the suggestions it reports.
//!
//! The embedding application supplies a [`Host`] (files, projects, user
//! notifications, background scheduling) and an [`AnalysisApi`] transport.
//! [`SyncCoordinator`] serializes the cache-mutating cycles: it pushes file
//! hashes and content to the server as bundles, polls the analysis, and
//! stores the translated per-file suggestions in a [`ResultCache`]. Reads go
//! straight to the cache.
//!
//! Everything is synchronous and blocking; run updates on worker threads and
//! cancel them through a [`Progress`] handle such as [`CancelToken`].

pub mod api;
pub mod cache;
pub mod config;
pub mod content;
pub mod coordinator;
pub mod errors;
pub mod host;
pub mod models;
pub mod protocol;
pub mod status;
pub mod translate;

#[cfg(test)]
mod testing;

pub use api::{AnalysisApi, AnalysisResponse, AnalysisStatus};
pub use cache::ResultCache;
pub use config::SyncConfig;
pub use content::{ContentHashes, HashCache};
pub use coordinator::{SyncCoordinator, UpdateOutcome};
pub use errors::{SyncError, SyncResult};
pub use host::{BackgroundTask, CancelToken, Host, Progress};
pub use models::{Marker, Suggestion, SuggestionForFile, TextRange};
