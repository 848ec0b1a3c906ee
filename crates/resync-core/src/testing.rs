//! In-memory host and scripted analysis service shared by the unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::api::{
    AnalysisApi, AnalysisResponse, AnalysisResults, AnalysisStatus, BundleResponse,
    CreateBundleRequest, ExtendBundleRequest, FileHashContent, StatusResponse,
};
use crate::errors::{SyncError, SyncResult};
use crate::host::{BackgroundTask, CancelToken, Host};

// ---------------------------------------------------------------------------
// Host
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TestFile {
    pub project: String,
    pub path: String,
}

pub fn file(project: &str, path: &str) -> TestFile {
    TestFile {
        project: project.to_string(),
        path: path.to_string(),
    }
}

#[derive(Default)]
pub struct TestHost {
    contents: Mutex<HashMap<TestFile, String>>,
    denied: Mutex<HashSet<String>>,
    warnings: Mutex<Vec<String>>,
    login_prompts: Mutex<Vec<bool>>,
    rescans: Mutex<Vec<String>>,
    refreshed: Mutex<Vec<String>>,
    cancelled: Mutex<Vec<String>>,
    removed: Mutex<Vec<TestFile>>,
    background: Mutex<Vec<BackgroundTask>>,
}

impl TestHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&self, file: TestFile, content: &str) {
        self.contents.lock().insert(file, content.to_string());
    }

    pub fn deny_consent(&self, project: &str) {
        self.denied.lock().insert(project.to_string());
    }

    pub fn warnings(&self) -> Vec<String> {
        self.warnings.lock().clone()
    }

    pub fn login_prompts(&self) -> Vec<bool> {
        self.login_prompts.lock().clone()
    }

    pub fn rescans(&self) -> Vec<String> {
        self.rescans.lock().clone()
    }

    pub fn refreshed(&self) -> Vec<String> {
        self.refreshed.lock().clone()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().clone()
    }

    pub fn removed(&self) -> Vec<TestFile> {
        self.removed.lock().clone()
    }

    pub fn pending_background(&self) -> usize {
        self.background.lock().len()
    }

    /// Run every queued background task on the current thread.
    pub fn run_background(&self) -> usize {
        self.drain_background(&CancelToken::new())
    }

    /// Run every queued background task with an already cancelled handle.
    pub fn run_background_cancelled(&self) -> usize {
        let token = CancelToken::new();
        token.cancel();
        self.drain_background(&token)
    }

    fn drain_background(&self, token: &CancelToken) -> usize {
        let tasks: Vec<BackgroundTask> = std::mem::take(&mut *self.background.lock());
        let count = tasks.len();
        for task in tasks {
            task(token);
        }
        count
    }
}

impl Host for TestHost {
    type File = TestFile;
    type Project = String;

    fn file_path(&self, file: &TestFile) -> String {
        format!("/{}/{}", file.project, file.path)
    }

    fn file_name(&self, file: &TestFile) -> String {
        file.path.rsplit('/').next().unwrap_or_default().to_string()
    }

    fn file_size(&self, file: &TestFile) -> u64 {
        self.contents
            .lock()
            .get(file)
            .map(|c| c.len() as u64)
            .unwrap_or(0)
    }

    fn file_content(&self, file: &TestFile) -> SyncResult<String> {
        self.contents
            .lock()
            .get(file)
            .cloned()
            .ok_or_else(|| SyncError::Content {
                path: self.file_path(file),
                reason: "no such file".to_string(),
            })
    }

    fn project_of(&self, file: &TestFile) -> String {
        file.project.clone()
    }

    fn project_name(&self, project: &String) -> String {
        project.clone()
    }

    fn line_start_offset(&self, file: &TestFile, line: usize) -> usize {
        let contents = self.contents.lock();
        let content = contents.get(file).map(String::as_str).unwrap_or("");
        let mut starts = std::iter::once(0).chain(
            content
                .char_indices()
                .filter(|(_, c)| *c == '\n')
                .map(|(i, _)| i + 1),
        );
        starts.nth(line).unwrap_or(content.len())
    }

    fn session_token(&self) -> String {
        "test-token".to_string()
    }

    fn consent_given(&self, project: &String) -> bool {
        !self.denied.lock().contains(project)
    }

    fn prompt_login(&self, _project: &String, show: bool) {
        self.login_prompts.lock().push(show);
    }

    fn show_warning(&self, _project: &String, message: &str) {
        self.warnings.lock().push(message.to_string());
    }

    fn request_full_rescan(&self, project: &String) {
        self.rescans.lock().push(project.clone());
    }

    fn refresh_ui(&self, project: &String) {
        self.refreshed.lock().push(project.clone());
    }

    fn on_files_removed(&self, files: &[TestFile]) {
        self.removed.lock().extend_from_slice(files);
    }

    fn cancel_background(&self, project: &String) {
        self.cancelled.lock().push(project.clone());
    }

    fn spawn_background(&self, _title: &str, _file: &TestFile, task: BackgroundTask) {
        self.background.lock().push(task);
    }
}

// ---------------------------------------------------------------------------
// Analysis service
// ---------------------------------------------------------------------------

/// A report with status `DONE` whose results are parsed from `results_json`.
pub fn report(results_json: &str) -> AnalysisResponse {
    let results: AnalysisResults =
        serde_json::from_str(results_json).expect("valid analysis results JSON");
    AnalysisResponse {
        status: AnalysisStatus::Done,
        progress: 1.0,
        analysis_url: String::new(),
        analysis_results: Some(results),
        status_code: 200,
        status_description: "OK".to_string(),
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApiCall {
    Create { files: usize },
    CreateContents { files: usize },
    Extend {
        parent: String,
        files: usize,
        removed: usize,
    },
    Check,
    Upload { files: usize },
    Analysis,
}

/// Scripted [`AnalysisApi`]. Queued responses are served in order; once a
/// queue runs dry the call succeeds with an empty, finished answer.
#[derive(Default)]
pub struct StubApi {
    bundles: Mutex<VecDeque<BundleResponse>>,
    checks: Mutex<VecDeque<BundleResponse>>,
    analyses: Mutex<VecDeque<AnalysisResponse>>,
    default_analysis: Mutex<Option<AnalysisResponse>>,
    calls: Mutex<Vec<ApiCall>>,
    delay: Mutex<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    auto_bundles: AtomicUsize,
}

fn status_text(code: u16) -> String {
    match code {
        200 => "OK",
        401 => "Unauthorized",
        404 => "Not Found",
        _ => "Error",
    }
    .to_string()
}

impl StubApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn push_bundle(&self, status_code: u16, bundle_id: &str, missing: &[&str]) {
        self.bundles.lock().push_back(BundleResponse {
            bundle_id: bundle_id.to_string(),
            missing_files: missing.iter().map(|m| m.to_string()).collect(),
            status_code,
            status_description: status_text(status_code),
        });
    }

    pub fn push_check(&self, status_code: u16, missing: &[&str]) {
        self.checks.lock().push_back(BundleResponse {
            bundle_id: String::new(),
            missing_files: missing.iter().map(|m| m.to_string()).collect(),
            status_code,
            status_description: status_text(status_code),
        });
    }

    pub fn push_analysis(
        &self,
        status_code: u16,
        status: AnalysisStatus,
        progress: f64,
        results: Option<AnalysisResults>,
    ) {
        self.analyses.lock().push_back(AnalysisResponse {
            status,
            progress,
            analysis_url: String::new(),
            analysis_results: results,
            status_code,
            status_description: status_text(status_code),
        });
    }

    /// Answer every unscripted poll with `report`.
    pub fn set_default_analysis(&self, report: AnalysisResponse) {
        *self.default_analysis.lock() = Some(report);
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().clone()
    }

    pub fn bundle_calls(&self) -> Vec<ApiCall> {
        self.calls()
            .into_iter()
            .filter(|call| {
                matches!(
                    call,
                    ApiCall::Create { .. } | ApiCall::CreateContents { .. } | ApiCall::Extend { .. }
                )
            })
            .collect()
    }

    pub fn check_calls(&self) -> usize {
        self.calls().iter().filter(|c| **c == ApiCall::Check).count()
    }

    pub fn analysis_calls(&self) -> usize {
        self.calls().iter().filter(|c| **c == ApiCall::Analysis).count()
    }

    pub fn uploaded_batches(&self) -> Vec<usize> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ApiCall::Upload { files } => Some(files),
                _ => None,
            })
            .collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn enter(&self, call: ApiCall) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.calls.lock().push(call);
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn next_bundle(&self) -> BundleResponse {
        self.bundles.lock().pop_front().unwrap_or_else(|| {
            let n = self.auto_bundles.fetch_add(1, Ordering::SeqCst) + 1;
            BundleResponse {
                bundle_id: format!("auto-bundle-{n}"),
                missing_files: vec![],
                status_code: 200,
                status_description: status_text(200),
            }
        })
    }
}

impl AnalysisApi for StubApi {
    fn create_bundle(
        &self,
        _token: &str,
        request: &CreateBundleRequest,
    ) -> SyncResult<BundleResponse> {
        let call = match request {
            CreateBundleRequest::Hashes { files } => ApiCall::Create { files: files.len() },
            CreateBundleRequest::Contents { files } => {
                ApiCall::CreateContents { files: files.len() }
            }
        };
        self.enter(call);
        let response = self.next_bundle();
        self.leave();
        Ok(response)
    }

    fn extend_bundle(
        &self,
        _token: &str,
        parent_bundle_id: &str,
        request: &ExtendBundleRequest,
    ) -> SyncResult<BundleResponse> {
        self.enter(ApiCall::Extend {
            parent: parent_bundle_id.to_string(),
            files: request.files.len(),
            removed: request.removed_files.len(),
        });
        let response = self.next_bundle();
        self.leave();
        Ok(response)
    }

    fn check_bundle(&self, _token: &str, _bundle_id: &str) -> SyncResult<BundleResponse> {
        self.enter(ApiCall::Check);
        let response = self.checks.lock().pop_front().unwrap_or(BundleResponse {
            status_code: 200,
            status_description: status_text(200),
            ..BundleResponse::default()
        });
        self.leave();
        Ok(response)
    }

    fn upload_files(
        &self,
        _token: &str,
        _bundle_id: &str,
        files: &[FileHashContent],
    ) -> SyncResult<StatusResponse> {
        self.enter(ApiCall::Upload { files: files.len() });
        self.leave();
        Ok(StatusResponse {
            status_code: 200,
            status_description: status_text(200),
        })
    }

    fn get_analysis(
        &self,
        _token: &str,
        _bundle_id: &str,
        _min_severity: u8,
        _use_linter: bool,
    ) -> SyncResult<AnalysisResponse> {
        self.enter(ApiCall::Analysis);
        let scripted = self.analyses.lock().pop_front();
        let response = scripted
            .or_else(|| self.default_analysis.lock().clone())
            .unwrap_or_else(|| report(r#"{"files": {}, "suggestions": {}}"#));
        self.leave();
        Ok(response)
    }
}
