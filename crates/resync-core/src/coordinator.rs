//! Serialized sync cycles over a shared result cache.
//!
//! Every cycle that can change the cache runs under one global lock, across
//! all projects. Readers go straight to the cache and never take it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::api::AnalysisApi;
use crate::cache::ResultCache;
use crate::config::SyncConfig;
use crate::content::{ContentHashes, HashCache};
use crate::errors::SyncResult;
use crate::host::{BackgroundTask, Host, Progress};
use crate::models::SuggestionForFile;
use crate::protocol::BundleSync;
use crate::status::StatusGate;

/// What an [`SyncCoordinator::update`] call did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Nothing was requested, or the user has not consented for the project.
    Skipped,
    /// The cycle ran; `committed` files got fresh suggestions.
    Synced { committed: usize },
    /// The progress handle was cancelled; nothing from the cycle was kept.
    Cancelled,
}

/// Result of a locked cycle, before the lock is released.
struct Cycle<F> {
    committed: usize,
    reconcile: Option<F>,
}

impl<F> Cycle<F> {
    fn committed(committed: usize) -> Self {
        Self {
            committed,
            reconcile: None,
        }
    }
}

/// Marks a project in progress for as long as it lives.
struct InProgress<'a, H: Host> {
    cache: &'a ResultCache<H::File, H::Project>,
    project: H::Project,
}

impl<'a, H: Host> InProgress<'a, H> {
    fn set(cache: &'a ResultCache<H::File, H::Project>, project: &H::Project) -> Self {
        cache.set_in_progress(project);
        Self {
            cache,
            project: project.clone(),
        }
    }
}

impl<H: Host> Drop for InProgress<'_, H> {
    fn drop(&mut self) {
        self.cache.clear_in_progress(&self.project);
    }
}

struct Inner<H: Host> {
    host: Arc<H>,
    api: Arc<dyn AnalysisApi>,
    hashes: Arc<dyn ContentHashes<H>>,
    cache: ResultCache<H::File, H::Project>,
    gate: StatusGate,
    config: SyncConfig,
    lock: Mutex<()>,
}

/// Entry point of the library. Cheap to clone; clones share all state.
pub struct SyncCoordinator<H: Host> {
    inner: Arc<Inner<H>>,
}

impl<H: Host> Clone for SyncCoordinator<H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<H: Host> SyncCoordinator<H> {
    /// Coordinator hashing content through a [`HashCache`] over `host`.
    pub fn new(host: Arc<H>, api: Arc<dyn AnalysisApi>, config: SyncConfig) -> Self {
        let hashes = Arc::new(HashCache::new(Arc::clone(&host)));
        Self::with_hashes(host, api, hashes, config)
    }

    pub fn with_hashes(
        host: Arc<H>,
        api: Arc<dyn AnalysisApi>,
        hashes: Arc<dyn ContentHashes<H>>,
        config: SyncConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                host,
                api,
                hashes,
                cache: ResultCache::new(),
                gate: StatusGate::new(),
                config,
                lock: Mutex::new(()),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Update cycle
    // -----------------------------------------------------------------------

    /// Bring the cache up to date for `files` and tell the server about
    /// `files_to_remove`.
    ///
    /// Files already cached are not re-analysed. A single new file takes the
    /// fast path: it is analysed on its own and committed right away, and a
    /// full reconciliation with the project's bundle is handed to
    /// [`Host::spawn_background`] once the lock is released. Anything larger
    /// runs the full protocol and commits its result at once.
    pub fn update(
        &self,
        project: &H::Project,
        files: &[H::File],
        files_to_remove: &[H::File],
        progress: &dyn Progress,
    ) -> SyncResult<UpdateOutcome> {
        let inner = &self.inner;
        if files.is_empty() && files_to_remove.is_empty() {
            warn!(project = ?project, "Both files to update and files to remove are empty");
            return Ok(UpdateOutcome::Skipped);
        }
        if !inner.host.consent_given(project) {
            warn!(
                project = %inner.host.project_name(project),
                "Consent check failed, skipping update"
            );
            return Ok(UpdateOutcome::Skipped);
        }

        let started = Instant::now();
        let result = {
            let _lock = inner.lock.lock();
            let _in_progress = InProgress::<H>::set(&inner.cache, project);
            info!(
                project = %inner.host.project_name(project),
                files = files.len(),
                removed = files_to_remove.len(),
                "Update requested"
            );
            inner.run_update(project, files, files_to_remove, progress)
        };
        inner.host.refresh_ui(project);
        info!(
            "--- Update took: {} milliseconds",
            started.elapsed().as_millis()
        );

        match result {
            Ok(cycle) => {
                if let Some(file) = cycle.reconcile {
                    self.schedule_reconciliation(project.clone(), file);
                }
                Ok(UpdateOutcome::Synced {
                    committed: cycle.committed,
                })
            }
            Err(e) if e.is_cancelled() => {
                info!(project = ?project, "Update cancelled");
                Ok(UpdateOutcome::Cancelled)
            }
            Err(e) => Err(e),
        }
    }

    fn schedule_reconciliation(&self, project: H::Project, file: H::File) {
        let inner = Arc::clone(&self.inner);
        let title = format!(
            "{}: Analysing {}",
            inner.config.presentable_name,
            inner.host.file_name(&file)
        );
        let task_file = file.clone();
        let task: BackgroundTask = Box::new(move |progress: &dyn Progress| {
            inner.reconcile(&project, task_file, progress)
        });
        self.inner.host.spawn_background(&title, &file, task);
    }

    // -----------------------------------------------------------------------
    // Removal / reset
    // -----------------------------------------------------------------------

    /// Drop `files` from the cache and forget their content. Returns how many
    /// were cached.
    pub fn remove_files(&self, files: &[H::File]) -> usize {
        let inner = &self.inner;
        let removed = {
            let _lock = inner.lock.lock();
            for file in files {
                inner.hashes.forget_file(file);
            }
            inner.cache.remove(files)
        };
        debug!(requested = files.len(), removed, "Removed files from cache");
        inner.host.on_files_removed(files);
        removed
    }

    pub fn remove_project(&self, project: &H::Project) {
        let _lock = self.inner.lock.lock();
        self.inner.remove_project(project);
    }

    /// Forget everything about `project`, or about every known project.
    /// Background work is cancelled first so it gives up the lock.
    pub fn reset(&self, project: Option<&H::Project>) {
        let inner = &self.inner;
        let projects = match project {
            Some(project) => vec![project.clone()],
            None => inner.cache.projects(),
        };
        for project in projects {
            info!(project = %inner.host.project_name(&project), "Resetting");
            inner.host.cancel_background(&project);
            {
                let _lock = inner.lock.lock();
                inner.remove_project(&project);
                inner.cache.set_analysis_url(&project, String::new());
            }
            inner.host.refresh_ui(&project);
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn get(&self, files: &[H::File]) -> HashMap<H::File, Vec<SuggestionForFile>> {
        self.inner.cache.get(files)
    }

    pub fn get_file(&self, file: &H::File) -> Vec<SuggestionForFile> {
        self.inner.cache.get_file(file)
    }

    pub fn is_cached(&self, file: &H::File) -> bool {
        self.inner.cache.is_cached(file)
    }

    pub fn all_files_with_suggestions(&self, project: &H::Project) -> HashSet<H::File> {
        let host = &self.inner.host;
        self.inner
            .cache
            .all_files_with_suggestions(project, |file| host.project_of(file))
    }

    pub fn analysis_url(&self, project: &H::Project) -> String {
        self.inner.cache.analysis_url(project)
    }

    pub fn add_project(&self, project: &H::Project) -> bool {
        self.inner.cache.add_project(project)
    }

    pub fn projects(&self) -> Vec<H::Project> {
        self.inner.cache.projects()
    }

    pub fn is_project_analysed(&self, project: &H::Project) -> bool {
        self.inner.cache.is_project_analysed(project)
    }

    pub fn is_update_in_progress(&self, project: &H::Project) -> bool {
        self.inner.cache.is_in_progress(project)
    }

    pub fn wait_for_update_to_finish(
        &self,
        project: &H::Project,
        progress: &dyn Progress,
    ) -> SyncResult<()> {
        self.inner
            .cache
            .wait_for_update_to_finish(project, progress, self.inner.config.wait_delay)
    }
}

impl<H: Host> Inner<H> {
    fn protocol(&self) -> BundleSync<'_, H> {
        BundleSync::new(
            self.host.as_ref(),
            self.api.as_ref(),
            self.hashes.as_ref(),
            &self.cache,
            &self.gate,
            &self.config,
        )
    }

    /// Body of an update; the caller holds the lock.
    fn run_update(
        &self,
        project: &H::Project,
        files: &[H::File],
        files_to_remove: &[H::File],
        progress: &dyn Progress,
    ) -> SyncResult<Cycle<H::File>> {
        let mut seen = HashSet::new();
        let to_sync: Vec<H::File> = files
            .iter()
            .filter(|file| !self.cache.is_cached(file) && seen.insert(*file))
            .cloned()
            .collect();
        let sync = self.protocol();

        if to_sync.len() == 1 && files_to_remove.is_empty() {
            let file = &to_sync[0];
            let committed = match sync.retrieve_single(file, progress)? {
                Some(suggestions) => {
                    self.cache.put(file.clone(), suggestions);
                    1
                }
                None => 0,
            };
            return Ok(Cycle {
                committed,
                reconcile: Some(file.clone()),
            });
        }
        if !to_sync.is_empty() {
            let result = sync.retrieve(project, &to_sync, files_to_remove, progress)?;
            let committed = result.len();
            self.cache.put_all(result);
            return Ok(Cycle::committed(committed));
        }
        if !files_to_remove.is_empty() {
            info!("Files to remove: {} files", files_to_remove.len());
            sync.retrieve(project, &[], files_to_remove, progress)?;
            return Ok(Cycle::committed(0));
        }
        warn!("Nothing to update for {} files", files.len());
        Ok(Cycle::committed(0))
    }

    /// Background pass that folds a fast-path file into the project bundle.
    fn reconcile(&self, project: &H::Project, file: H::File, progress: &dyn Progress) {
        let _lock = self.lock.lock();
        let _in_progress = InProgress::<H>::set(&self.cache, project);
        match self
            .protocol()
            .retrieve(project, std::slice::from_ref(&file), &[], progress)
        {
            Ok(_) => debug!(file = ?file, "Reconciled with project bundle"),
            Err(e) if e.is_cancelled() => info!(file = ?file, "Reconciliation cancelled"),
            Err(e) => warn!(file = ?file, "Reconciliation failed: {e}"),
        }
    }

    /// The caller holds the lock.
    fn remove_project(&self, project: &H::Project) {
        self.hashes.forget_project(project);
        self.cache.remove_bundle_id(project);
        let files = self
            .cache
            .files_of(project, |file| self.host.project_of(file));
        let removed = self.cache.remove(&files);
        debug!(project = ?project, removed, "Removed project from cache");
    }
}
