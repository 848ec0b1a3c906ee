//! Shared typed models used across the cache, protocol, and translation layers.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Bundle identifiers
// ---------------------------------------------------------------------------

/// Suffix the server puts on a bundle that became empty, e.g. after an extend
/// removed every file of its parent.
pub const EMPTY_BUNDLE_SUFFIX: &str =
    "/DEEPCODE_PRIVATE_BUNDLE/0000000000000000000000000000000000000000000000000000000000000000";

/// Map the server's "empty bundle" sentinel to `""` (no valid bundle).
pub fn normalize_bundle_id(bundle_id: &str) -> String {
    if bundle_id.ends_with(EMPTY_BUNDLE_SUFFIX) {
        String::new()
    } else {
        bundle_id.to_string()
    }
}

// ---------------------------------------------------------------------------
// Suggestion
// ---------------------------------------------------------------------------

/// One line of an example fix commit.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExampleLine {
    pub line: String,
    pub line_number: i64,
    pub line_change: String,
}

/// A commit from the analysis dataset that fixed the same issue elsewhere.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExampleCommitFix {
    #[serde(rename = "commitURL")]
    pub commit_url: String,
    pub lines: Vec<ExampleLine>,
}

/// One static-analysis finding, shared across all of its occurrences.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Suggestion {
    pub id: String,
    #[serde(rename = "rule", alias = "ruleId")]
    pub rule_id: String,
    pub message: String,
    pub severity: i32,
    pub repo_dataset_size: i64,
    pub example_commit_fixes: Vec<ExampleCommitFix>,
}

// ---------------------------------------------------------------------------
// Ranges
// ---------------------------------------------------------------------------

/// A sub-highlight of a suggestion: the span of the message it explains and
/// the code spans it points at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Marker {
    /// Character span inside the suggestion message (end exclusive).
    pub message: TextRange,
    pub positions: Vec<TextRange>,
}

/// A location inside one file, in absolute character offsets plus the row and
/// column it was derived from.
///
/// Rows are 1-based, columns 0-based with an exclusive end.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TextRange {
    pub start_offset: usize,
    pub end_offset: usize,
    pub start_row: usize,
    pub end_row: usize,
    pub start_col: usize,
    pub end_col: usize,
    /// Display order is the order the server sent them in.
    pub markers: Vec<Marker>,
}

impl TextRange {
    /// A bare offset span with no row/column information.
    pub fn span(start_offset: usize, end_offset: usize) -> Self {
        Self {
            start_offset,
            end_offset,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.end_offset.saturating_sub(self.start_offset)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A suggestion together with every range it covers in one file.
#[derive(Clone, Debug, PartialEq)]
pub struct SuggestionForFile {
    pub suggestion: Arc<Suggestion>,
    pub ranges: Vec<TextRange>,
}

impl SuggestionForFile {
    pub fn id(&self) -> &str {
        &self.suggestion.id
    }
}
