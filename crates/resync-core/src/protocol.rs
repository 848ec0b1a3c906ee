//! Bundle synchronization protocol.
//!
//! A sync cycle runs in four steps against the remote service:
//!
//! 1. **create/extend**: send `path → hash` for the files to sync (chunked
//!    under the request budget) plus the paths to remove; the server answers
//!    with a bundle id and the paths it has no content for.
//! 2. **upload**: send `{hash, content}` for the missing paths, then ask the
//!    server again what is still missing; repeat a bounded number of times.
//! 3. **poll**: request the analysis until it is `DONE`, `FAILED`, or the
//!    attempt budget runs out.
//! 4. **translate**: turn the report into per-file suggestions.
//!
//! Nothing here touches the suggestion map; callers decide what to commit.
//! Bundle ids and analysis URLs are recorded as the steps complete.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::api::{
    AnalysisApi, AnalysisResponse, AnalysisStatus, BundleResponse, CreateBundleRequest,
    ExtendBundleRequest, FileContent, FileHashContent,
};
use crate::cache::ResultCache;
use crate::config::SyncConfig;
use crate::content::ContentHashes;
use crate::errors::{SyncError, SyncResult};
use crate::host::{sleep_cancellable, Host, Progress};
use crate::models::{normalize_bundle_id, SuggestionForFile};
use crate::status::{StatusClass, StatusGate};
use crate::translate::{translate, Translated};

/// Status the server uses when the parent of an extend no longer exists.
const PARENT_EXPIRED: u16 = 404;

/// One protocol run over borrowed collaborators.
pub struct BundleSync<'a, H: Host> {
    host: &'a H,
    api: &'a dyn AnalysisApi,
    hashes: &'a dyn ContentHashes<H>,
    cache: &'a ResultCache<H::File, H::Project>,
    gate: &'a StatusGate,
    config: &'a SyncConfig,
}

impl<'a, H: Host> BundleSync<'a, H> {
    pub fn new(
        host: &'a H,
        api: &'a dyn AnalysisApi,
        hashes: &'a dyn ContentHashes<H>,
        cache: &'a ResultCache<H::File, H::Project>,
        gate: &'a StatusGate,
        config: &'a SyncConfig,
    ) -> Self {
        Self {
            host,
            api,
            hashes,
            cache,
            gate,
            config,
        }
    }

    fn text(&self, what: &str) -> String {
        format!("{}: {what}... ", self.config.presentable_name)
    }

    // -----------------------------------------------------------------------
    // Full cycles
    // -----------------------------------------------------------------------

    /// Run create/extend, upload, poll and translate for `to_sync`, informing
    /// the server about `to_remove` on the way. No cache checks.
    pub fn retrieve(
        &self,
        project: &H::Project,
        to_sync: &[H::File],
        to_remove: &[H::File],
        progress: &dyn Progress,
    ) -> SyncResult<Translated<H::File>> {
        if to_sync.is_empty() && to_remove.is_empty() {
            warn!("Both files to sync and files to remove are empty");
            return Ok(HashMap::new());
        }

        let response = self.send_bundles(project, to_sync, to_remove, progress)?;
        if !StatusClass::classify(response.status_code).is_ok() {
            warn!(
                "Create/Extend Bundle failed with {}, skipping analysis",
                response.status_code
            );
            return Ok(HashMap::new());
        }
        self.upload_files_step(project, to_sync, response.missing_files, progress)?;

        let bundle_id = self.cache.bundle_id(project);
        if bundle_id.is_empty() {
            return Ok(HashMap::new());
        }
        let started = Instant::now();
        progress.set_text(&self.text("Waiting for analysis from server"));
        progress.check_canceled()?;
        let report = self.get_analysis(project, &bundle_id, progress)?;
        let result = translate(self.host, self.cache, project, to_sync, &report, progress)?;
        info!(
            "--- Get Analysis took: {} milliseconds",
            started.elapsed().as_millis()
        );
        Ok(result)
    }

    /// Analyse one file through a throwaway bundle built from its content.
    /// The project's own bundle id is left untouched.
    ///
    /// `None` when no finished analysis came back for the file.
    pub fn retrieve_single(
        &self,
        file: &H::File,
        progress: &dyn Progress,
    ) -> SyncResult<Option<Vec<SuggestionForFile>>> {
        let project = self.host.project_of(file);
        let started = Instant::now();
        info!("Creating temporary Bundle from File content");
        progress.check_canceled()?;

        self.hashes.forget_file(file);
        let path = self.host.file_path(file);
        let content = match self.hashes.content(file) {
            Ok(content) => content,
            Err(SyncError::Cancelled) => return Err(SyncError::Cancelled),
            Err(e) => {
                warn!("Skipping {path}: {e}");
                return Ok(None);
            }
        };
        let request = CreateBundleRequest::Contents {
            files: vec![FileContent { path, content }],
        };
        let response = self
            .api
            .create_bundle(&self.host.session_token(), &request)?;
        self.check_status(
            &project,
            response.status_code,
            &response.status_description,
            "Bad Create/Extend Bundle request: ",
        );

        let bundle_id = normalize_bundle_id(&response.bundle_id);
        if bundle_id.is_empty() {
            return Ok(None);
        }
        info!(
            "--- Create temporary Bundle took: {} milliseconds\nbundleId: {}\nmissingFiles: {:?}",
            started.elapsed().as_millis(),
            bundle_id,
            response.missing_files
        );
        if !response.missing_files.is_empty() {
            warn!("missingFiles is NOT empty!");
        }

        progress.check_canceled()?;
        let started = Instant::now();
        let report = self.get_analysis(&project, &bundle_id, progress)?;
        let mut result = translate(
            self.host,
            self.cache,
            &project,
            std::slice::from_ref(file),
            &report,
            progress,
        )?;
        // The temporary bundle's report page is not the project's.
        self.cache.set_analysis_url(&project, String::new());
        info!(
            "--- Get Analysis took: {} milliseconds",
            started.elapsed().as_millis()
        );
        Ok(result.remove(file))
    }

    // -----------------------------------------------------------------------
    // Step 1: create / extend
    // -----------------------------------------------------------------------

    /// Send `path → hash` for `to_sync` and the paths of `to_remove`.
    ///
    /// Entries are flushed in intermediate requests whenever the estimated
    /// request size crosses the budget; the final request always goes out,
    /// carries the removals, and its missing-file list is the one returned.
    pub fn create_bundle_step(
        &self,
        project: &H::Project,
        to_sync: &[H::File],
        to_remove: &[H::File],
        progress: &dyn Progress,
    ) -> SyncResult<Vec<String>> {
        Ok(self
            .send_bundles(project, to_sync, to_remove, progress)?
            .missing_files)
    }

    /// Same as [`Self::create_bundle_step`], returning the whole final
    /// response.
    fn send_bundles(
        &self,
        project: &H::Project,
        to_sync: &[H::File],
        to_remove: &[H::File],
        progress: &dyn Progress,
    ) -> SyncResult<BundleResponse> {
        let started = Instant::now();
        let text = self.text("Preparing files for upload");
        progress.set_text(&text);
        info!("{text}");
        progress.check_canceled()?;

        let mut path_to_hash: IndexMap<String, String> = IndexMap::new();
        // Twice the raw length as a stand-in for encoding overhead.
        let mut estimated_size = 0usize;
        let total = to_sync.len();
        for (done, file) in to_sync.iter().enumerate() {
            self.hashes.forget_file(file);
            progress.check_canceled()?;
            progress.set_fraction(done as f64 / total as f64);
            progress.set_text(&format!("{text}{} of {total} files done.", done + 1));

            let path = self.host.file_path(file);
            let hash = match self.hashes.hash(file) {
                Ok(hash) => hash,
                Err(SyncError::Cancelled) => return Err(SyncError::Cancelled),
                Err(e) => {
                    warn!("Skipping {path}: {e}");
                    continue;
                }
            };
            if done == 0 {
                debug!("First file to proceed: \npath = {path}\nhash = {hash}");
            }

            estimated_size += (path.len() + hash.len()) * 2;
            path_to_hash.insert(path, hash);
            if estimated_size > self.config.max_bundle_size {
                self.make_bundle(project, std::mem::take(&mut path_to_hash), &[], progress)?;
                estimated_size = 0;
            }
        }

        let response = self.make_bundle(project, path_to_hash, to_remove, progress)?;
        info!(
            "--- Create/Extend Bundle took: {} milliseconds\nbundleId: {}\nmissingFiles: {}",
            started.elapsed().as_millis(),
            response.bundle_id,
            response.missing_files.len()
        );
        Ok(response)
    }

    /// One create or extend request. Extends when the project holds a
    /// bundle; on an expired parent retries as a fresh create, boundedly.
    fn make_bundle(
        &self,
        project: &H::Project,
        files: IndexMap<String, String>,
        to_remove: &[H::File],
        progress: &dyn Progress,
    ) -> SyncResult<BundleResponse> {
        let removed_files: Vec<String> =
            to_remove.iter().map(|f| self.host.file_path(f)).collect();
        let attempts = self.config.max_bundle_retries + 1;

        for _ in 0..attempts {
            progress.check_canceled()?;
            let parent_bundle_id = self.cache.bundle_id(project);
            if !parent_bundle_id.is_empty()
                && !to_remove.is_empty()
                && files.is_empty()
                && self.removes_every_cached_file(project, to_remove)
            {
                warn!(
                    "Attempt to Extending a bundle by removing all the parent bundle's files: {:?}",
                    to_remove
                );
            }

            let mut message = if parent_bundle_id.is_empty() {
                "Creating new Bundle with ".to_string()
            } else {
                format!("Extending existing Bundle [{parent_bundle_id}] with ")
            };
            message.push_str(&format!("{} files", files.len()));
            if !removed_files.is_empty() {
                message.push_str(&format!(" and remove {} files", removed_files.len()));
            }
            info!("{message}");

            let token = self.host.session_token();
            let response = if parent_bundle_id.is_empty() {
                let request = CreateBundleRequest::Hashes {
                    files: files.clone(),
                };
                self.api.create_bundle(&token, &request)?
            } else {
                let request = ExtendBundleRequest {
                    files: files.clone(),
                    removed_files: removed_files.clone(),
                };
                self.api
                    .extend_bundle(&token, &parent_bundle_id, &request)?
            };

            let class = self.check_status(
                project,
                response.status_code,
                &response.status_description,
                "Bad Create/Extend Bundle request: ",
            );
            if class.is_ok() {
                self.cache
                    .set_bundle_id(project, normalize_bundle_id(&response.bundle_id));
                return Ok(response);
            }
            if response.status_code != PARENT_EXPIRED {
                // Keep the last good bundle for the next cycle.
                return Ok(response);
            }
            // Parent bundle has expired: start over from a fresh bundle.
            self.cache.set_bundle_id(project, String::new());
        }
        Err(SyncError::BundleExpired { attempts })
    }

    fn removes_every_cached_file(&self, project: &H::Project, to_remove: &[H::File]) -> bool {
        let removing: HashSet<&H::File> = to_remove.iter().collect();
        self.cache
            .files_of(project, |f| self.host.project_of(f))
            .iter()
            .all(|f| removing.contains(f))
    }

    // -----------------------------------------------------------------------
    // Step 2: upload
    // -----------------------------------------------------------------------

    /// Upload content for `missing` paths until the server reports nothing
    /// missing, at most `upload_attempts` rounds. Returns the rounds made.
    ///
    /// Giving up is not an error: the analysis then runs over whatever the
    /// server has.
    pub fn upload_files_step(
        &self,
        project: &H::Project,
        to_sync: &[H::File],
        missing: Vec<String>,
        progress: &dyn Progress,
    ) -> SyncResult<usize> {
        let started = Instant::now();
        progress.set_text(&self.text("Uploading files to the server"));
        progress.check_canceled()?;

        let bundle_id = self.cache.bundle_id(project);
        let mut rounds = 0;
        if bundle_id.is_empty() {
            info!("BundleId is empty");
        } else if missing.is_empty() {
            info!("No missingFiles to Upload");
        } else {
            let attempts = self.config.upload_attempts;
            let mut missing = missing;
            while rounds < attempts {
                rounds += 1;
                self.upload_files(project, to_sync, &missing, &bundle_id, progress)?;
                missing = self.check_bundle(project, &bundle_id)?;
                if missing.is_empty() {
                    break;
                }
                warn!(
                    "Check Bundle found {} missingFiles (NOT uploaded), will try to upload {} more times:\nmissingFiles = {:?}",
                    missing.len(),
                    attempts - rounds,
                    missing
                );
            }
        }
        info!(
            "--- Upload Files took: {} milliseconds",
            started.elapsed().as_millis()
        );
        Ok(rounds)
    }

    /// Upload one round of `missing` in chunks bounded by file byte size.
    fn upload_files(
        &self,
        project: &H::Project,
        to_sync: &[H::File],
        missing: &[String],
        bundle_id: &str,
        progress: &dyn Progress,
    ) -> SyncResult<()> {
        let text = self.text("Uploading files to the server");
        let path_to_file: HashMap<String, &H::File> = to_sync
            .iter()
            .map(|file| (self.host.file_path(file), file))
            .collect();
        let total = missing.len();
        let budget = self.config.max_bundle_size as u64;
        let mut chunk: Vec<&H::File> = Vec::new();
        let mut chunk_size = 0u64;
        let mut unknown_count = 0usize;
        let mut first_unknown: Option<&str> = None;

        for (done, path) in missing.iter().enumerate() {
            progress.check_canceled()?;
            progress.set_fraction(done as f64 / total as f64);
            progress.set_text(&format!("{text}{} of {total} files done.", done + 1));

            let Some(file) = path_to_file.get(path) else {
                unknown_count += 1;
                first_unknown.get_or_insert(path.as_str());
                continue;
            };
            let size = self.host.file_size(file);
            if chunk_size + size > budget && !chunk.is_empty() {
                debug!("Files-chunk size: {chunk_size}");
                self.upload_chunk(project, &chunk, bundle_id, progress)?;
                chunk_size = 0;
                chunk.clear();
            }
            chunk_size += size;
            chunk.push(*file);
        }
        if let Some(first) = first_unknown {
            warn!(
                "{unknown_count} files requested in missingFiles not found in files to sync (skipped to upload).\nFirst broken missingFile: {first}"
            );
        }
        debug!("Last files-chunk size: {chunk_size}");
        self.upload_chunk(project, &chunk, bundle_id, progress)
    }

    fn upload_chunk(
        &self,
        project: &H::Project,
        files: &[&H::File],
        bundle_id: &str,
        progress: &dyn Progress,
    ) -> SyncResult<()> {
        info!("Uploading {} files... ", files.len());
        let mut payload = Vec::with_capacity(files.len());
        for file in files {
            progress.check_canceled()?;
            let entry = self
                .hashes
                .hash(file)
                .and_then(|hash| Ok((hash, self.hashes.content(file)?)));
            match entry {
                Ok((file_hash, file_content)) => payload.push(FileHashContent {
                    file_hash,
                    file_content,
                }),
                Err(SyncError::Cancelled) => return Err(SyncError::Cancelled),
                Err(e) => warn!("Skipping upload of {:?}: {e}", file),
            }
        }
        if payload.is_empty() {
            return Ok(());
        }
        let response = self
            .api
            .upload_files(&self.host.session_token(), bundle_id, &payload)?;
        self.check_status(
            project,
            response.status_code,
            &response.status_description,
            "Bad UploadFiles request: ",
        );
        Ok(())
    }

    /// Paths the server still lacks content for. A failed check reports
    /// nothing missing.
    fn check_bundle(&self, project: &H::Project, bundle_id: &str) -> SyncResult<Vec<String>> {
        let response = self
            .api
            .check_bundle(&self.host.session_token(), bundle_id)?;
        let class = self.check_status(
            project,
            response.status_code,
            &response.status_description,
            "Bad CheckBundle request: ",
        );
        if class.is_ok() {
            Ok(response.missing_files)
        } else {
            Ok(Vec::new())
        }
    }

    // -----------------------------------------------------------------------
    // Step 3: poll
    // -----------------------------------------------------------------------

    /// Poll the analysis of `bundle_id` until it reaches a terminal status.
    ///
    /// A failed request yields an empty report; running out of attempts
    /// yields the last, non-terminal report. On `FAILED` a full rescan of
    /// the project is requested since the caches are likely inconsistent.
    pub fn get_analysis(
        &self,
        project: &H::Project,
        bundle_id: &str,
        progress: &dyn Progress,
    ) -> SyncResult<AnalysisResponse> {
        let text = self.text("Waiting for analysis from server");
        let attempts = self.config.poll_attempts();
        let mut counter = 0usize;
        loop {
            if counter > 0 {
                sleep_cancellable(progress, self.config.poll_delay)?;
            }
            let response = self.api.get_analysis(
                &self.host.session_token(),
                bundle_id,
                self.config.min_severity,
                self.config.use_linter,
            )?;
            progress.check_canceled()?;
            debug!(status = ?response.status, progress = response.progress, "getAnalysis");
            let class = self.check_status(
                project,
                response.status_code,
                &response.status_description,
                "Bad GetAnalysis request: ",
            );
            if !class.is_ok() {
                return Ok(AnalysisResponse::empty());
            }

            let mut fraction = response.progress;
            if !(fraction > 0.0 && fraction <= 1.0) {
                fraction = counter as f64 / attempts.max(1) as f64;
            }
            progress.set_fraction(fraction);
            progress.set_text(&format!("{text}{}% done", (fraction * 100.0) as i64));

            if counter >= attempts {
                warn!("Timeout expire for waiting analysis results.");
                return Ok(response);
            }
            match response.status {
                AnalysisStatus::Done => return Ok(response),
                AnalysisStatus::Failed => {
                    warn!("FAILED getAnalysis request.");
                    self.host.request_full_rescan(project);
                    return Ok(response);
                }
                _ => {}
            }
            counter += 1;
        }
    }

    fn check_status(
        &self,
        project: &H::Project,
        status_code: u16,
        status_description: &str,
        context: &str,
    ) -> StatusClass {
        self.gate
            .check(self.host, project, status_code, status_description, context)
    }
}
