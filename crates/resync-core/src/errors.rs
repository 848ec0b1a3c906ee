//! Error types for the resync core library.

/// Top-level error enum for the resync core library.
///
/// HTTP failure statuses are not errors here: they are classified by
/// [`crate::status::StatusGate`] and turn into empty results. This enum covers
/// what has to unwind a cycle.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("operation cancelled")]
    Cancelled,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Parent bundle still reported as expired after {attempts} attempts")]
    BundleExpired { attempts: usize },

    #[error("Cannot read content of '{path}': {reason}")]
    Content { path: String, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SyncError::Cancelled)
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
