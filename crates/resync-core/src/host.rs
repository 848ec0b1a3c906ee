//! Capabilities the embedding application supplies to the sync core.
//!
//! A [`Host`] knows what a file and a project are, how to reach their
//! content, and how to talk to the user. The core only ever handles files and
//! projects as opaque keys.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::errors::{SyncError, SyncResult};

/// Longest single sleep between two cancellation checks.
const CANCEL_CHECK_SLICE: Duration = Duration::from_millis(50);

// ---------------------------------------------------------------------------
// Progress / cancellation
// ---------------------------------------------------------------------------

/// Progress reporting plus the cancellation signal of one unit of work.
pub trait Progress: Send + Sync {
    fn set_text(&self, text: &str);

    fn set_fraction(&self, fraction: f64);

    fn is_canceled(&self) -> bool;

    fn check_canceled(&self) -> SyncResult<()> {
        if self.is_canceled() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Sleep for `duration`, waking up regularly to honour cancellation.
pub fn sleep_cancellable(progress: &dyn Progress, duration: Duration) -> SyncResult<()> {
    let deadline = Instant::now() + duration;
    loop {
        progress.check_canceled()?;
        let now = Instant::now();
        if now >= deadline {
            return Ok(());
        }
        std::thread::sleep((deadline - now).min(CANCEL_CHECK_SLICE));
    }
}

#[derive(Default)]
struct ProgressState {
    text: String,
    fraction: f64,
}

/// Cloneable progress handle: every clone observes the same cancellation
/// flag and the same last reported text/fraction.
#[derive(Clone, Default)]
pub struct CancelToken {
    canceled: Arc<AtomicBool>,
    state: Arc<Mutex<ProgressState>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }

    pub fn text(&self) -> String {
        self.state.lock().text.clone()
    }

    pub fn fraction(&self) -> f64 {
        self.state.lock().fraction
    }
}

impl Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("canceled", &self.is_canceled())
            .finish()
    }
}

impl Progress for CancelToken {
    fn set_text(&self, text: &str) {
        tracing::trace!(text, "progress");
        self.state.lock().text = text.to_string();
    }

    fn set_fraction(&self, fraction: f64) {
        self.state.lock().fraction = fraction.clamp(0.0, 1.0);
    }

    fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Host
// ---------------------------------------------------------------------------

/// Work handed to [`Host::spawn_background`]. The host passes the progress
/// handle it uses to cancel the task.
pub type BackgroundTask = Box<dyn FnOnce(&dyn Progress) + Send + 'static>;

/// The embedding application.
pub trait Host: Send + Sync + 'static {
    type File: Clone + Eq + Hash + Debug + Send + Sync + 'static;
    type Project: Clone + Eq + Hash + Debug + Send + Sync + 'static;

    // -- File identity -------------------------------------------------------

    /// Path of the file as the server knows it (bundle key).
    fn file_path(&self, file: &Self::File) -> String;

    fn file_name(&self, file: &Self::File) -> String;

    /// Size of the file content in bytes.
    fn file_size(&self, file: &Self::File) -> u64;

    fn file_content(&self, file: &Self::File) -> SyncResult<String>;

    fn project_of(&self, file: &Self::File) -> Self::Project;

    fn project_name(&self, project: &Self::Project) -> String;

    /// Absolute character offset where the 0-based `line` starts.
    fn line_start_offset(&self, file: &Self::File, line: usize) -> usize;

    // -- Authorization -------------------------------------------------------

    fn session_token(&self) -> String;

    fn consent_given(&self, project: &Self::Project) -> bool;

    // -- Notifications -------------------------------------------------------

    /// Ask the user to log in. `show` is false when the prompt was already
    /// shown for the current failure streak.
    fn prompt_login(&self, project: &Self::Project, show: bool);

    fn show_warning(&self, project: &Self::Project, message: &str);

    // -- Scheduling ----------------------------------------------------------

    fn request_full_rescan(&self, project: &Self::Project);

    fn refresh_ui(&self, project: &Self::Project);

    fn on_files_removed(&self, _files: &[Self::File]) {}

    /// Cancel every background task running for `project`.
    fn cancel_background(&self, project: &Self::Project);

    /// Run `task` as an independent, cancellable unit of work.
    fn spawn_background(&self, title: &str, file: &Self::File, task: BackgroundTask);
}
