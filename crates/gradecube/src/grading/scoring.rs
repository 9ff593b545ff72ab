//! Verdicts from answers and sandbox runs
//!
//! Pure functions: nothing here touches the store or the sandbox.

use std::collections::HashMap;

use crate::config::OutputLimits;
use crate::grading::contract::{ReportedResult, parse_runner_output};
use crate::grading::model::{SubmissionStatus, Task, TestCase, TestRunResult, Verdict};
use crate::types::SandboxExecutionResult;

/// Appended to text cut by [`truncate`]
pub const TRUNCATION_MARKER: &str = "... (truncated)";

/// Message on results for declared cases the runner never reported
pub const NO_RESULT_MESSAGE: &str = "no result reported by runner";

/// Feedback for text and multiple choice tasks without a reference answer
pub const NO_SOLUTION_FEEDBACK: &str = "This task has no reference answer to compare against.";

/// Keep at most `max_chars` characters, marking the cut
pub fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{TRUNCATION_MARKER}", &text[..cut]),
        None => text.to_string(),
    }
}

/// Like [`truncate`], but blank text becomes `None`
fn truncate_nonblank(text: &str, max_chars: usize) -> Option<String> {
    (!text.trim().is_empty()).then(|| truncate(text, max_chars))
}

/// Grade a free-text answer: trimmed, case-insensitive comparison
///
/// A task without a reference answer accepts nothing.
pub fn grade_text(task: &Task, answer: Option<&str>) -> Verdict {
    let Some(solution) = task.solution.as_deref().filter(|s| !s.trim().is_empty()) else {
        return Verdict::new(SubmissionStatus::Incorrect, 0.0, NO_SOLUTION_FEEDBACK);
    };

    let answer = answer.unwrap_or_default().trim().to_lowercase();
    if answer == solution.trim().to_lowercase() {
        Verdict::new(SubmissionStatus::Correct, 1.0, "Correct answer.")
    } else {
        Verdict::new(SubmissionStatus::Incorrect, 0.0, "Incorrect answer.")
    }
}

/// Grade a multiple choice answer: it must be the solution and one of the options
pub fn grade_choice(task: &Task, answer: Option<&str>) -> Verdict {
    let Some(solution) = task.solution.as_deref().map(str::trim) else {
        return Verdict::new(SubmissionStatus::Incorrect, 0.0, NO_SOLUTION_FEEDBACK);
    };

    let answer = answer.unwrap_or_default().trim();
    let offered = task.options.iter().any(|option| option.trim() == answer);
    if !offered {
        return Verdict::new(
            SubmissionStatus::Incorrect,
            0.0,
            "The selected answer is not one of the options.",
        );
    }
    if answer == solution {
        Verdict::new(SubmissionStatus::Correct, 1.0, "Correct answer.")
    } else {
        Verdict::new(SubmissionStatus::Incorrect, 0.0, "Incorrect answer.")
    }
}

/// Pair reported results with declared cases, in declared order
///
/// Results for undeclared IDs are dropped and the first result for an ID wins.
/// Declared cases without a result fail with [`NO_RESULT_MESSAGE`].
pub fn reconcile(cases: &[TestCase], reported: Vec<ReportedResult>) -> Vec<TestRunResult> {
    let mut by_id: HashMap<String, ReportedResult> = HashMap::with_capacity(reported.len());
    for result in reported {
        by_id.entry(result.test_case_id.clone()).or_insert(result);
    }

    cases
        .iter()
        .map(|case| match by_id.remove(&case.id) {
            Some(result) => TestRunResult {
                test_case_id: case.id.clone(),
                test_case_name: case.name.clone(),
                passed: result.passed,
                actual_output: result.actual_output,
                expected_output: result.expected_output.or_else(|| {
                    (!case.expected_output.is_empty()).then(|| case.expected_output.clone())
                }),
                error_message: result.error_message,
                execution_time_ms: result.execution_time_ms,
            },
            None => TestRunResult::failed(case, NO_RESULT_MESSAGE),
        })
        .collect()
}

/// Failed results for every declared case
pub fn failing_results(cases: &[TestCase], message: &str) -> Vec<TestRunResult> {
    cases
        .iter()
        .map(|case| TestRunResult::failed(case, message))
        .collect()
}

/// Weighted score of results given in declared order
///
/// With no cases the score is 1.0. When every weight is zero each case counts
/// equally.
pub fn score(cases: &[TestCase], results: &[TestRunResult]) -> f64 {
    if cases.is_empty() {
        return 1.0;
    }

    let total: u64 = cases.iter().map(|case| u64::from(case.points)).sum();
    let passed = cases.iter().zip(results).filter(|(_, result)| result.passed);

    let raw = if total == 0 {
        passed.count() as f64 / cases.len() as f64
    } else {
        let earned: u64 = passed.map(|(case, _)| u64::from(case.points)).sum();
        earned as f64 / total as f64
    };
    raw.clamp(0.0, 1.0)
}

/// Status from the number of passed cases
pub fn status_for(passed: usize, declared: usize) -> SubmissionStatus {
    if passed == declared {
        SubmissionStatus::Correct
    } else if passed == 0 {
        SubmissionStatus::Incorrect
    } else {
        SubmissionStatus::PartiallyCorrect
    }
}

/// Turn a sandbox run of a code task into a verdict
pub fn classify(
    task: &Task,
    execution: &SandboxExecutionResult,
    limits: &OutputLimits,
) -> Verdict {
    let cases = &task.test_cases;
    let stdout = truncate_nonblank(&execution.stdout, limits.stdout_chars);
    let stderr = truncate_nonblank(&execution.stderr, limits.stderr_chars);

    if let Some(failure) = &execution.error {
        let message = truncate(&failure.to_string(), limits.test_message_chars);
        let status = if failure.is_timeout() {
            SubmissionStatus::Timeout
        } else {
            SubmissionStatus::Error
        };
        return Verdict::new(status, 0.0, truncate(&failure.to_string(), limits.feedback_chars))
            .with_results(failing_results(cases, &message))
            .with_output(stdout, stderr);
    }

    if execution.exit_code != 0
        && execution.stdout.trim().is_empty()
        && !execution.stderr.trim().is_empty()
    {
        let compile_error = truncate(execution.stderr.trim(), limits.compile_error_chars);
        let message = truncate(execution.stderr.trim(), limits.test_message_chars);
        return Verdict::error("The code failed to compile or crashed before any test ran.")
            .with_compile_error(compile_error)
            .with_results(failing_results(cases, &message))
            .with_output(stdout, stderr);
    }

    let Some(document) = parse_runner_output(&execution.stdout, limits) else {
        return Verdict::error(format!(
            "Could not read the test results (runner exited with code {}).",
            execution.exit_code
        ))
        .with_results(failing_results(cases, "runner output could not be parsed"))
        .with_output(stdout, stderr);
    };

    if let Some(compile_error) = document.compile_error {
        let message = truncate(&compile_error, limits.test_message_chars);
        return Verdict::error("The code failed to compile or load.")
            .with_compile_error(compile_error)
            .with_results(failing_results(cases, &message))
            .with_output(stdout, stderr);
    }

    if let Some(runner_error) = document.runner_error {
        let message = truncate(&runner_error, limits.test_message_chars);
        return Verdict::error(truncate(
            &format!("The test runner failed: {runner_error}"),
            limits.feedback_chars,
        ))
        .with_results(failing_results(cases, &message))
        .with_output(stdout, stderr);
    }

    if cases.is_empty() {
        if execution.exit_code != 0 {
            return Verdict::error(format!(
                "The runner exited with code {}.",
                execution.exit_code
            ))
            .with_output(stdout, stderr);
        }
        return Verdict::new(
            SubmissionStatus::Correct,
            1.0,
            "The code ran successfully; this task has no test cases.",
        )
        .with_output(stdout, stderr);
    }

    let results = reconcile(cases, document.test_results);
    let passed = results.iter().filter(|result| result.passed).count();
    let status = status_for(passed, cases.len());
    let feedback = match status {
        SubmissionStatus::Correct => format!("All tests passed ({passed}/{}).", cases.len()),
        SubmissionStatus::Incorrect => format!("No tests passed (0/{}).", cases.len()),
        _ => format!("{passed} of {} tests passed.", cases.len()),
    };

    Verdict::new(status, score(cases, &results), feedback)
        .with_results(results)
        .with_output(stdout, stderr)
}
