//! In-memory store of analysis results and per-project sync state.
//!
//! Each map has its own lock so readers never wait on a running sync cycle.
//! Serializing whole cycles is the coordinator's job; the in-progress flags
//! here are advisory and guarded separately from both.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::warn;

use crate::errors::SyncResult;
use crate::host::Progress;
use crate::models::SuggestionForFile;

pub struct ResultCache<F, P> {
    suggestions: RwLock<HashMap<F, Vec<SuggestionForFile>>>,
    bundle_ids: RwLock<HashMap<P, String>>,
    analysis_urls: RwLock<HashMap<P, String>>,
    in_progress: Mutex<HashSet<P>>,
    progress_changed: Condvar,
}

impl<F, P> Default for ResultCache<F, P>
where
    F: Clone + Eq + Hash + std::fmt::Debug,
    P: Clone + Eq + Hash + std::fmt::Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<F, P> ResultCache<F, P>
where
    F: Clone + Eq + Hash + std::fmt::Debug,
    P: Clone + Eq + Hash + std::fmt::Debug,
{
    pub fn new() -> Self {
        Self {
            suggestions: RwLock::new(HashMap::new()),
            bundle_ids: RwLock::new(HashMap::new()),
            analysis_urls: RwLock::new(HashMap::new()),
            in_progress: Mutex::new(HashSet::new()),
            progress_changed: Condvar::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Suggestions
    // -----------------------------------------------------------------------

    /// Cached suggestions for `files`. Files without an entry are left out of
    /// the result and only reported in the log.
    pub fn get(&self, files: &[F]) -> HashMap<F, Vec<SuggestionForFile>> {
        if files.is_empty() {
            warn!("suggestions requested for an empty list of files");
            return HashMap::new();
        }
        let map = self.suggestions.read();
        let mut result = HashMap::with_capacity(files.len());
        let mut missing = Vec::new();
        for file in files {
            match map.get(file) {
                Some(suggestions) => {
                    result.insert(file.clone(), suggestions.clone());
                }
                None => missing.push(file),
            }
        }
        if !missing.is_empty() {
            warn!(
                "Suggestions not found for {} files: {:?}",
                missing.len(),
                missing
            );
        }
        result
    }

    pub fn get_file(&self, file: &F) -> Vec<SuggestionForFile> {
        self.suggestions
            .read()
            .get(file)
            .cloned()
            .unwrap_or_default()
    }

    pub fn put(&self, file: F, suggestions: Vec<SuggestionForFile>) {
        self.suggestions.write().insert(file, suggestions);
    }

    /// Commit a whole result map at once.
    pub fn put_all(&self, entries: HashMap<F, Vec<SuggestionForFile>>) {
        self.suggestions.write().extend(entries);
    }

    /// Remove `files`, returning how many of them were cached.
    pub fn remove(&self, files: &[F]) -> usize {
        let mut map = self.suggestions.write();
        files
            .iter()
            .filter(|file| map.remove(*file).is_some())
            .count()
    }

    pub fn is_cached(&self, file: &F) -> bool {
        self.suggestions.read().contains_key(file)
    }

    /// Cached files that belong to `project` according to `project_of`.
    pub fn files_of(&self, project: &P, project_of: impl Fn(&F) -> P) -> Vec<F> {
        self.suggestions
            .read()
            .keys()
            .filter(|file| project_of(file) == *project)
            .cloned()
            .collect()
    }

    pub fn all_files_with_suggestions(
        &self,
        project: &P,
        project_of: impl Fn(&F) -> P,
    ) -> HashSet<F> {
        self.suggestions
            .read()
            .iter()
            .filter(|(file, suggestions)| !suggestions.is_empty() && project_of(file) == *project)
            .map(|(file, _)| file.clone())
            .collect()
    }

    // -----------------------------------------------------------------------
    // Projects and bundles
    // -----------------------------------------------------------------------

    /// Register `project` with no bundle. Returns false if it was known.
    pub fn add_project(&self, project: &P) -> bool {
        let mut ids = self.bundle_ids.write();
        if ids.contains_key(project) {
            return false;
        }
        ids.insert(project.clone(), String::new());
        true
    }

    pub fn projects(&self) -> Vec<P> {
        self.bundle_ids.read().keys().cloned().collect()
    }

    pub fn is_project_analysed(&self, project: &P) -> bool {
        self.bundle_ids.read().contains_key(project)
    }

    /// Current bundle id, `""` when the project holds none.
    pub fn bundle_id(&self, project: &P) -> String {
        self.bundle_ids
            .read()
            .get(project)
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_bundle_id(&self, project: &P, bundle_id: String) {
        self.bundle_ids.write().insert(project.clone(), bundle_id);
    }

    pub fn remove_bundle_id(&self, project: &P) -> bool {
        self.bundle_ids.write().remove(project).is_some()
    }

    pub fn analysis_url(&self, project: &P) -> String {
        self.analysis_urls
            .read()
            .get(project)
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_analysis_url(&self, project: &P, url: String) {
        self.analysis_urls.write().insert(project.clone(), url);
    }

    // -----------------------------------------------------------------------
    // In-progress flags
    // -----------------------------------------------------------------------

    pub fn set_in_progress(&self, project: &P) {
        self.in_progress.lock().insert(project.clone());
    }

    pub fn clear_in_progress(&self, project: &P) {
        self.in_progress.lock().remove(project);
        self.progress_changed.notify_all();
    }

    pub fn is_in_progress(&self, project: &P) -> bool {
        self.in_progress.lock().contains(project)
    }

    /// Block until no cycle is running for `project`, re-checking
    /// cancellation at least every `delay`.
    pub fn wait_for_update_to_finish(
        &self,
        project: &P,
        progress: &dyn Progress,
        delay: Duration,
    ) -> SyncResult<()> {
        let mut flags = self.in_progress.lock();
        while flags.contains(project) {
            progress.check_canceled()?;
            self.progress_changed.wait_for(&mut flags, delay);
        }
        Ok(())
    }
}
