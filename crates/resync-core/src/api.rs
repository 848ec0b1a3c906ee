//! Wire shapes of the remote analysis service and the transport seam.
//!
//! The transport itself (HTTP client, auth headers, base URL) lives outside
//! this crate. Implementations of [`AnalysisApi`] fill in `status_code` and
//! `status_description` from the HTTP response and only return
//! [`SyncError::Transport`](crate::errors::SyncError::Transport) when no HTTP
//! response was received at all.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::errors::SyncResult;
use crate::models::Suggestion;

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// A file sent by content instead of by hash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContent {
    pub path: String,
    pub content: String,
}

/// Body of a `createBundle` call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum CreateBundleRequest {
    /// `{"files": {path: hash}}`
    Hashes { files: IndexMap<String, String> },
    /// `{"files": [{path, content}]}`
    Contents { files: Vec<FileContent> },
}

/// Body of an `extendBundle` call.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtendBundleRequest {
    pub files: IndexMap<String, String>,
    pub removed_files: Vec<String>,
}

/// One entry of an `uploadFiles` call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileHashContent {
    pub file_hash: String,
    pub file_content: String,
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// Response carrying nothing but the HTTP outcome.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct StatusResponse {
    #[serde(skip)]
    pub status_code: u16,
    #[serde(skip)]
    pub status_description: String,
}

/// Response of `createBundle`, `extendBundle` and `checkBundle`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BundleResponse {
    pub bundle_id: String,
    pub missing_files: Vec<String>,
    #[serde(skip)]
    pub status_code: u16,
    #[serde(skip)]
    pub status_description: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalysisStatus {
    Created,
    Queued,
    Running,
    Done,
    Failed,
    /// Status of a locally produced empty report, or anything unrecognized.
    #[default]
    #[serde(other)]
    Unknown,
}

impl AnalysisStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, AnalysisStatus::Done | AnalysisStatus::Failed)
    }
}

/// `[start, end]` pair as sent by the server.
pub type Span = [i64; 2];

/// A row/column location, 1-based. Columns are start-inclusive and
/// end-exclusive.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub rows: Span,
    pub cols: Span,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WireMarker {
    /// Inclusive character span inside the suggestion message.
    pub msg: Span,
    pub pos: Vec<Position>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilePosition {
    pub rows: Span,
    pub cols: Span,
    pub markers: Vec<WireMarker>,
}

impl FilePosition {
    pub fn position(&self) -> Position {
        Position {
            rows: self.rows,
            cols: self.cols,
        }
    }
}

/// Suggestion index → occurrences, in server order.
pub type FileSuggestions = IndexMap<String, Vec<FilePosition>>;

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AnalysisResults {
    pub files: HashMap<String, FileSuggestions>,
    pub suggestions: Option<HashMap<String, Suggestion>>,
}

/// Response of `getAnalysis`: the raw analysis report.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalysisResponse {
    pub status: AnalysisStatus,
    pub progress: f64,
    #[serde(rename = "analysisURL")]
    pub analysis_url: String,
    pub analysis_results: Option<AnalysisResults>,
    #[serde(skip)]
    pub status_code: u16,
    #[serde(skip)]
    pub status_description: String,
}

impl AnalysisResponse {
    /// The non-terminal report returned when a poll request fails.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_done(&self) -> bool {
        self.status == AnalysisStatus::Done
    }
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// A response that records the HTTP outcome it was decoded from.
pub trait HttpOutcome {
    fn set_status(&mut self, status_code: u16, status_description: &str);
}

macro_rules! impl_http_outcome {
    ($($ty:ty),*) => {
        $(impl HttpOutcome for $ty {
            fn set_status(&mut self, status_code: u16, status_description: &str) {
                self.status_code = status_code;
                self.status_description = status_description.to_string();
            }
        })*
    };
}

impl_http_outcome!(StatusResponse, BundleResponse, AnalysisResponse);

/// Build a response from a raw HTTP status and body.
///
/// Only a 200 body is parsed; any other status yields the default response
/// carrying that status, so callers can classify it. A malformed 200 body is
/// a [`SyncError::Json`](crate::errors::SyncError::Json).
pub fn decode<T>(status_code: u16, status_description: &str, body: &str) -> SyncResult<T>
where
    T: DeserializeOwned + Default + HttpOutcome,
{
    let mut response = if status_code == 200 && !body.trim().is_empty() {
        serde_json::from_str(body)?
    } else {
        T::default()
    };
    response.set_status(status_code, status_description);
    Ok(response)
}

// ---------------------------------------------------------------------------
// Transport seam
// ---------------------------------------------------------------------------

/// Remote analysis service.
pub trait AnalysisApi: Send + Sync {
    fn create_bundle(&self, token: &str, request: &CreateBundleRequest)
        -> SyncResult<BundleResponse>;

    fn extend_bundle(
        &self,
        token: &str,
        parent_bundle_id: &str,
        request: &ExtendBundleRequest,
    ) -> SyncResult<BundleResponse>;

    fn check_bundle(&self, token: &str, bundle_id: &str) -> SyncResult<BundleResponse>;

    fn upload_files(
        &self,
        token: &str,
        bundle_id: &str,
        files: &[FileHashContent],
    ) -> SyncResult<StatusResponse>;

    fn get_analysis(
        &self,
        token: &str,
        bundle_id: &str,
        min_severity: u8,
        use_linter: bool,
    ) -> SyncResult<AnalysisResponse>;
}
