//! Translation of raw analysis reports into per-file suggestions.
//!
//! The server reports each suggestion once and refers to it by index from
//! every file it occurs in; positions are 1-based rows and columns. This
//! module resolves the indexes to shared [`Suggestion`] records and turns the
//! positions into absolute character offsets using the host's line table.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::api::{AnalysisResponse, FilePosition, Position, WireMarker};
use crate::cache::ResultCache;
use crate::errors::SyncResult;
use crate::host::{Host, Progress};
use crate::models::{Marker, Suggestion, SuggestionForFile, TextRange};

pub type Translated<F> = HashMap<F, Vec<SuggestionForFile>>;

/// Build the per-file suggestion lists for `files` out of `report`.
///
/// Returns an empty map for any report that is not `DONE`, and also when the
/// report references a suggestion index it does not define: a partial
/// result would hide the inconsistency.
pub fn translate<H: Host>(
    host: &H,
    cache: &ResultCache<H::File, H::Project>,
    project: &H::Project,
    files: &[H::File],
    report: &AnalysisResponse,
    progress: &dyn Progress,
) -> SyncResult<Translated<H::File>> {
    if !report.is_done() {
        return Ok(HashMap::new());
    }
    cache.set_analysis_url(project, report.analysis_url.clone());
    let Some(results) = report.analysis_results.as_ref() else {
        warn!("Analysis results missing for: {report:?}");
        return Ok(HashMap::new());
    };

    // One Arc per suggestion, shared by every file that refers to it.
    let mut shared: HashMap<&str, Arc<Suggestion>> = HashMap::new();
    let mut result = HashMap::with_capacity(files.len());

    for file in files {
        let path = host.file_path(file);
        let Some(file_suggestions) = results.files.get(&path) else {
            result.insert(file.clone(), Vec::new());
            continue;
        };
        let Some(suggestions) = results.suggestions.as_ref() else {
            warn!("Suggestions are empty for: {report:?}");
            return Ok(HashMap::new());
        };
        progress.check_canceled()?;

        let mut for_file = Vec::with_capacity(file_suggestions.len());
        for (index, positions) in file_suggestions {
            let suggestion = match shared.get(index.as_str()) {
                Some(suggestion) => Arc::clone(suggestion),
                None => {
                    let Some(found) = suggestions.get(index) else {
                        warn!("Suggestion not found for suggestionIndex: {index}\nGetAnalysisResponse: {report:?}");
                        return Ok(HashMap::new());
                    };
                    let found = Arc::new(found.clone());
                    shared.insert(index.as_str(), Arc::clone(&found));
                    found
                }
            };
            let ranges = positions
                .iter()
                .filter_map(|position| file_position_range(host, file, position))
                .collect();
            for_file.push(SuggestionForFile { suggestion, ranges });
        }
        result.insert(file.clone(), for_file);
    }
    Ok(result)
}

fn file_position_range<H: Host>(
    host: &H,
    file: &H::File,
    position: &FilePosition,
) -> Option<TextRange> {
    let markers = position
        .markers
        .iter()
        .filter_map(|marker| parse_marker(host, file, marker))
        .collect();
    position_to_range(host, file, &position.position(), markers)
}

fn parse_marker<H: Host>(host: &H, file: &H::File, marker: &WireMarker) -> Option<Marker> {
    let [start, end] = marker.msg;
    let Some(end) = end.checked_add(1) else {
        warn!("Incorrect {marker:?}\nin file: {}", host.file_path(file));
        return None;
    };
    let message = TextRange::span(start.max(0) as usize, end.max(0) as usize);
    let positions = marker
        .pos
        .iter()
        .filter_map(|position| position_to_range(host, file, position, Vec::new()))
        .collect();
    Some(Marker { message, positions })
}

/// Convert a 1-based row/column position into an absolute range. Positions
/// with a row below 1 or a negative column are logged and dropped.
pub fn position_to_range<H: Host>(
    host: &H,
    file: &H::File,
    position: &Position,
    markers: Vec<Marker>,
) -> Option<TextRange> {
    let incorrect = || {
        warn!(
            "Incorrect {position:?}\nin file: {}",
            host.file_path(file)
        );
        None
    };
    let [start_row, end_row] = position.rows;
    // i64::MIN has no predecessor; treat it like any other negative column.
    let start_col = position.cols[0].checked_sub(1).unwrap_or(-1);
    let end_col = position.cols[1];

    if start_row <= 0 || end_row <= 0 || start_col < 0 || end_col < 0 {
        return incorrect();
    }
    let (start_row, end_row) = (start_row as usize, end_row as usize);
    let (start_col, end_col) = (start_col as usize, end_col as usize);

    let line_start = host.line_start_offset(file, start_row - 1);
    let line_end = host.line_start_offset(file, end_row - 1);
    let (Some(start_offset), Some(end_offset)) = (
        line_start.checked_add(start_col),
        line_end.checked_add(end_col),
    ) else {
        return incorrect();
    };

    Some(TextRange {
        start_offset,
        end_offset,
        start_row,
        end_row,
        start_col,
        end_col,
        markers,
    })
}
