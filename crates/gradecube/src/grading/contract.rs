//! Files exchanged with the runner harness
//!
//! The harness reads a JSON array of test cases and prints one result
//! document on stdout. Runner output comes from untrusted code, so it is
//! parsed from a loose [`serde_json::Value`] and every field is checked.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::OutputLimits;
use crate::grading::model::TestCase;
use crate::grading::scoring::truncate;

/// Longest test case ID accepted from the runner
const MAX_ID_CHARS: usize = 200;

#[derive(Serialize)]
struct TestDataEntry<'a> {
    id: &'a str,
    name: &'a str,
    input: &'a [String],
    expected_output: &'a [String],
}

/// Serialize test cases into the harness input file
pub fn test_data_json(cases: &[TestCase]) -> Result<String, serde_json::Error> {
    let entries: Vec<_> = cases
        .iter()
        .map(|case| TestDataEntry {
            id: &case.id,
            name: &case.name,
            input: &case.input,
            expected_output: &case.expected_output,
        })
        .collect();
    serde_json::to_string(&entries)
}

/// The harness result document after validation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunnerDocument {
    pub compile_error: Option<String>,
    pub runner_error: Option<String>,
    pub test_results: Vec<ReportedResult>,
}

/// One entry of `test_results`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportedResult {
    pub test_case_id: String,
    pub passed: bool,
    pub actual_output: Option<Vec<String>>,
    pub expected_output: Option<Vec<String>>,
    pub error_message: Option<String>,
    pub execution_time_ms: Option<u64>,
}

/// Find and validate the result document in a run's stdout
///
/// The whole output is tried first, then its last non-blank line. Returns
/// `None` if neither is a JSON object.
pub fn parse_runner_output(stdout: &str, limits: &OutputLimits) -> Option<RunnerDocument> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return None;
    }

    let object = parse_object(trimmed).or_else(|| {
        trimmed
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .and_then(parse_object)
    })?;

    Some(RunnerDocument::from_object(&object, limits))
}

fn parse_object(text: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str(text).ok()? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

impl RunnerDocument {
    /// Build a document from a parsed object, dropping anything malformed
    pub fn from_object(object: &Map<String, Value>, limits: &OutputLimits) -> Self {
        let test_results = match object.get("test_results") {
            Some(Value::Array(items)) => items
                .iter()
                .take(limits.max_reported_tests)
                .filter_map(|item| match item {
                    Value::Object(map) => ReportedResult::from_object(map, limits),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        };

        Self {
            compile_error: text_field(object, "compile_error", limits.compile_error_chars),
            runner_error: text_field(object, "runner_error", limits.feedback_chars),
            test_results,
        }
    }
}

impl ReportedResult {
    fn from_object(object: &Map<String, Value>, limits: &OutputLimits) -> Option<Self> {
        let test_case_id = match object.get("testCaseId")? {
            Value::String(id) if !id.is_empty() => truncate(id, MAX_ID_CHARS),
            Value::Number(id) => id.to_string(),
            _ => return None,
        };

        Some(Self {
            test_case_id,
            passed: matches!(object.get("passed"), Some(Value::Bool(true))),
            actual_output: lines_field(object, "actualOutput", limits),
            expected_output: lines_field(object, "expectedOutput", limits),
            error_message: text_field(object, "errorMessage", limits.test_message_chars),
            execution_time_ms: object.get("executionTimeMs").and_then(millis),
        })
    }
}

/// A non-blank string field, capped
fn text_field(object: &Map<String, Value>, key: &str, max_chars: usize) -> Option<String> {
    match object.get(key) {
        Some(Value::String(text)) if !text.trim().is_empty() => Some(truncate(text, max_chars)),
        _ => None,
    }
}

/// A list of output lines; non-string entries are dropped
fn lines_field(object: &Map<String, Value>, key: &str, limits: &OutputLimits) -> Option<Vec<String>> {
    match object.get(key) {
        Some(Value::Array(items)) => Some(
            items
                .iter()
                .filter_map(Value::as_str)
                .take(limits.output_lines)
                .map(|line| truncate(line, limits.output_line_chars))
                .collect(),
        ),
        _ => None,
    }
}

fn millis(value: &Value) -> Option<u64> {
    if let Some(ms) = value.as_u64() {
        return Some(ms);
    }
    let ms = value.as_f64()?;
    // Saturating cast
    (ms.is_finite() && ms >= 0.0).then(|| ms.round() as u64)
}
