use gradecube::grading::{SkipReason, test_data_json};
use gradecube::{
    GradeOutcome, Language, SandboxExecutionResult, SandboxFailure, SubmissionStatus,
    SubmitAnswer, Task, TaskType,
};

use super::{ScriptedSandbox, fixture_task, service};

fn code_answer(task_id: &str, code: &str) -> SubmitAnswer {
    SubmitAnswer {
        user_id: "student-1".to_string(),
        course_id: "course-1".to_string(),
        lesson_id: "lesson-1".to_string(),
        task_id: task_id.to_string(),
        answer_code: Some(code.to_string()),
        ..Default::default()
    }
}

fn text_answer(task_id: &str, text: &str) -> SubmitAnswer {
    SubmitAnswer {
        user_id: "student-1".to_string(),
        task_id: task_id.to_string(),
        answer_text: Some(text.to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_text_answer_matches_ignoring_case_and_spaces() {
    let sandbox = ScriptedSandbox::printing("");
    let (service, _) = service(sandbox.clone(), vec![fixture_task("capital.json")]);

    let submitted = service
        .submit_answer(text_answer("capital-of-france", "  paris "))
        .await
        .unwrap();
    service.wait_idle().await;

    let graded = service.submission(submitted.id).await.unwrap();
    assert_eq!(graded.status, SubmissionStatus::Correct);
    assert_eq!(graded.score, Some(1.0));
    assert!(graded.checked_at.is_some());
    assert!(sandbox.requests().is_empty());
}

#[tokio::test]
async fn test_python_add_passes() {
    let stdout = r#"{"compile_error":null,"runner_error":null,"test_results":[{"testCaseId":"tc1","testCaseName":"add","passed":true,"actualOutput":["7"],"expectedOutput":["7"],"errorMessage":null,"executionTimeMs":12}]}"#;
    let sandbox = ScriptedSandbox::printing(stdout);
    let (service, _) = service(sandbox.clone(), vec![fixture_task("python_add.json")]);

    let submitted = service
        .submit_answer(code_answer("python-add", "def main_function(a, b):\n    print(int(a) + int(b))\n"))
        .await
        .unwrap();
    service.wait_idle().await;

    let graded = service.submission(submitted.id).await.unwrap();
    assert_eq!(graded.status, SubmissionStatus::Correct);
    assert_eq!(graded.score, Some(1.0));
    assert_eq!(graded.language, Some(Language::Python));
    assert_eq!(graded.test_run_results.len(), 1);
    let result = &graded.test_run_results[0];
    assert!(result.passed);
    assert_eq!(result.test_case_id, "tc1");
    assert_eq!(result.actual_output, Some(vec!["7".to_string()]));
    assert_eq!(result.execution_time_ms, Some(12));
}

#[tokio::test]
async fn test_request_carries_code_runner_and_test_data() {
    let task = fixture_task("python_add.json");
    let sandbox = ScriptedSandbox::printing(r#"{"test_results": []}"#);
    let (service, _) = service(sandbox.clone(), vec![task.clone()]);

    let code = "def main_function(a, b):\n    print(int(a) + int(b))\n";
    service
        .submit_answer(code_answer("python-add", code))
        .await
        .unwrap();
    service.wait_idle().await;

    let requests = sandbox.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.image, "gradecube-python-runner:latest");
    assert_eq!(request.command, vec!["python", "run_tests.py"]);
    assert_eq!(request.files["student_code.py"], code);
    assert!(request.files["run_tests.py"].contains("main_function"));

    let data: serde_json::Value = serde_json::from_str(&request.files["test_data.json"]).unwrap();
    let expected: serde_json::Value =
        serde_json::from_str(&test_data_json(&task.test_cases).unwrap()).unwrap();
    assert_eq!(data, expected);
    assert_eq!(data[0]["expected_output"][0], "7");
    assert_eq!(request.limits.timeout_seconds, Some(10));
}

#[tokio::test]
async fn test_task_limits_reach_the_sandbox() {
    let sandbox = ScriptedSandbox::printing(r#"{"test_results": []}"#);
    let (service, _) = service(sandbox.clone(), vec![fixture_task("python_weighted.json")]);

    service
        .submit_answer(code_answer("python-weighted", "def main_function(a, b): pass"))
        .await
        .unwrap();
    service.wait_idle().await;

    let requests = sandbox.requests();
    assert_eq!(requests[0].limits.timeout_seconds, Some(5));
    assert_eq!(requests[0].limits.memory_limit_mb, Some(128));
}

#[tokio::test]
async fn test_crash_before_tests_is_an_error() {
    let sandbox = ScriptedSandbox::new(SandboxExecutionResult {
        stderr: "Traceback (most recent call last):\nValueError: boom\n".to_string(),
        exit_code: 1,
        ..Default::default()
    });
    let (service, _) = service(sandbox, vec![fixture_task("python_add.json")]);

    let submitted = service
        .submit_answer(code_answer("python-add", "raise ValueError('boom')"))
        .await
        .unwrap();
    service.wait_idle().await;

    let graded = service.submission(submitted.id).await.unwrap();
    assert_eq!(graded.status, SubmissionStatus::Error);
    assert_eq!(graded.score, Some(0.0));
    assert!(
        graded
            .compile_error_message
            .as_deref()
            .unwrap()
            .contains("ValueError: boom")
    );
    assert!(graded.test_run_results.iter().all(|r| !r.passed));
}

#[tokio::test]
async fn test_weighted_cases_give_partial_score() {
    let stdout = r#"{"test_results": [
        {"testCaseId": "small", "passed": false, "actualOutput": ["3"], "expectedOutput": ["2"]},
        {"testCaseId": "large", "passed": true, "actualOutput": ["42"], "expectedOutput": ["42"]}
    ]}"#;
    let sandbox = ScriptedSandbox::printing(stdout);
    let (service, _) = service(sandbox, vec![fixture_task("python_weighted.json")]);

    let submitted = service
        .submit_answer(code_answer("python-weighted", "def main_function(a, b): pass"))
        .await
        .unwrap();
    service.wait_idle().await;

    let graded = service.submission(submitted.id).await.unwrap();
    assert_eq!(graded.status, SubmissionStatus::PartiallyCorrect);
    assert_eq!(graded.score, Some(0.75));
    let names: Vec<_> = graded
        .test_run_results
        .iter()
        .map(|r| r.test_case_name.as_str())
        .collect();
    assert_eq!(names, ["small numbers", "large numbers"]);
}

#[tokio::test]
async fn test_timeout_marks_every_case_failed() {
    let sandbox = ScriptedSandbox::new(SandboxExecutionResult::failed(SandboxFailure::TimedOut {
        seconds: 5,
    }));
    let (service, _) = service(sandbox, vec![fixture_task("python_weighted.json")]);

    let submitted = service
        .submit_answer(code_answer("python-weighted", "while True: pass"))
        .await
        .unwrap();
    service.wait_idle().await;

    let graded = service.submission(submitted.id).await.unwrap();
    assert_eq!(graded.status, SubmissionStatus::Timeout);
    assert_eq!(graded.score, Some(0.0));
    assert_eq!(graded.test_run_results.len(), 2);
    assert!(graded.test_run_results.iter().all(|r| !r.passed));
}

#[tokio::test]
async fn test_status_history_is_monotonic() {
    let sandbox = ScriptedSandbox::printing(r#"{"test_results": []}"#);
    let (service, store) = service(sandbox, vec![fixture_task("python_add.json")]);

    let submitted = service
        .submit_answer(code_answer("python-add", "def main_function(a, b): pass"))
        .await
        .unwrap();
    service.wait_idle().await;

    let history = store.status_history(submitted.id).await;
    assert_eq!(history[0], SubmissionStatus::Pending);
    assert_eq!(history[1], SubmissionStatus::Checking);
    assert_eq!(history.len(), 3);
    assert!(history[2].is_terminal());
}

#[tokio::test]
async fn test_graded_submission_is_not_regraded() {
    let sandbox = ScriptedSandbox::printing("");
    let (service, _) = service(sandbox, vec![fixture_task("capital.json")]);

    let submitted = service
        .submit_answer(text_answer("capital-of-france", "Lyon"))
        .await
        .unwrap();
    service.wait_idle().await;

    let outcome = service.orchestrator().grade(submitted.id).await.unwrap();
    assert_eq!(
        outcome,
        GradeOutcome::Skipped(SkipReason::NotPending(SubmissionStatus::Incorrect))
    );
}

#[tokio::test]
async fn test_multiple_choice_requires_listed_option() {
    let task = Task {
        id: "mc".to_string(),
        language: None,
        task_type: TaskType::MultipleChoice,
        solution: Some("B".to_string()),
        options: vec!["A".to_string(), "B".to_string()],
        test_cases: Vec::new(),
        timeout_seconds: None,
        memory_limit_mb: None,
    };
    let (service, _) = service(ScriptedSandbox::printing(""), vec![task]);

    let right = service.submit_answer(text_answer("mc", "B")).await.unwrap();
    let unlisted = service.submit_answer(text_answer("mc", "C")).await.unwrap();
    service.wait_idle().await;

    assert_eq!(
        service.submission(right.id).await.unwrap().status,
        SubmissionStatus::Correct
    );
    assert_eq!(
        service.submission(unlisted.id).await.unwrap().status,
        SubmissionStatus::Incorrect
    );
}
