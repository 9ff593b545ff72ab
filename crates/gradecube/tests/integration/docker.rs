//! Tests against a real Docker daemon

use std::sync::Arc;

use gradecube::grading::test_data_json;
use gradecube::{
    AdmissionController, Config, DockerEngine, ImageProvisioner, Language, ProvisionOutcome,
    RuntimeTable, Sandbox, SandboxExecutor, SandboxFailure, SubmissionStatus, SubmitAnswer,
};

use super::{fixture, fixture_task, service};

/// Provision every runner image once and return a sandbox over the default config
async fn docker_sandbox(config: &Config) -> Arc<SandboxExecutor<DockerEngine>> {
    let engine = Arc::new(DockerEngine::from_config(config));
    let runtimes = RuntimeTable::from_config(config).expect("default runtimes");
    let provisioner = ImageProvisioner::new(engine.clone());
    provisioner
        .check_daemon()
        .await
        .expect("docker daemon should be reachable");
    runtimes
        .provision_all(&provisioner)
        .await
        .expect("runner images should build");

    Arc::new(SandboxExecutor::new(
        engine,
        AdmissionController::new(config.max_concurrent_sandboxes),
        config,
    ))
}

async fn grade_python(source: &str) -> gradecube::Submission {
    let config = Config::default();
    let sandbox = docker_sandbox(&config).await;
    let (service, _) = service(sandbox, vec![fixture_task("python_add.json")]);

    let submitted = service
        .submit_answer(SubmitAnswer {
            user_id: "docker".to_string(),
            task_id: "python-add".to_string(),
            answer_code: Some(fixture(&format!("sources/{source}"))),
            ..Default::default()
        })
        .await
        .expect("submit failed");
    service.wait_idle().await;
    service.submission(submitted.id).await.expect("lookup failed")
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_python_add_correct() {
    let graded = grade_python("add.py").await;

    assert_eq!(graded.status, SubmissionStatus::Correct);
    assert_eq!(graded.score, Some(1.0));
    assert_eq!(
        graded.test_run_results[0].actual_output,
        Some(vec!["7".to_string()])
    );
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_python_exception_fails_the_case() {
    let graded = grade_python("raises.py").await;

    assert_eq!(graded.status, SubmissionStatus::Incorrect);
    let message = graded.test_run_results[0].error_message.as_deref().unwrap();
    assert!(message.contains("boom"));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_python_syntax_error() {
    let graded = grade_python("syntax_error.py").await;

    assert_eq!(graded.status, SubmissionStatus::Error);
    assert_eq!(graded.score, Some(0.0));
    assert!(graded.compile_error_message.is_some());
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_python_infinite_loop_times_out() {
    let config = Config::default();
    let sandbox = docker_sandbox(&config).await;
    let runtimes = RuntimeTable::from_config(&config).unwrap();
    let runtime = runtimes.get(Language::Python).unwrap();
    let task = fixture_task("python_add.json");

    let overrides = gradecube::ResourceLimits {
        timeout_seconds: Some(2),
        ..gradecube::ResourceLimits::unset()
    };
    let request = runtime.request(
        &fixture("sources/spin.py"),
        test_data_json(&task.test_cases).unwrap(),
        &overrides,
    );
    let result = sandbox.execute(request).await;

    assert_eq!(result.error, Some(SandboxFailure::TimedOut { seconds: 2 }));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_javascript_and_java_runners() {
    let config = Config::default();
    let sandbox = docker_sandbox(&config).await;
    let runtimes = RuntimeTable::from_config(&config).unwrap();
    let task = fixture_task("python_add.json");

    for (language, source) in [
        (Language::JavaScript, "add.js"),
        (Language::Java, "StudentCode.java"),
    ] {
        let runtime = runtimes.get(language).unwrap();
        let request = runtime.request(
            &fixture(&format!("sources/{source}")),
            test_data_json(&task.test_cases).unwrap(),
            &gradecube::ResourceLimits::unset(),
        );
        let result = sandbox.execute(request).await;

        assert!(result.is_success(), "{language}: {:?}", result.error);
        assert!(result.stdout.contains("\"passed\": true") || result.stdout.contains("\"passed\":true"));
    }
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_provisioning_is_idempotent() {
    let config = Config::default();
    let engine = Arc::new(DockerEngine::from_config(&config));
    let runtimes = RuntimeTable::from_config(&config).unwrap();
    let runtime = runtimes.get(Language::Python).unwrap();
    let provisioner = ImageProvisioner::new(engine);

    let first = provisioner
        .ensure(&runtime.image, &runtime.dockerfile)
        .await
        .unwrap();
    assert_ne!(first, ProvisionOutcome::Cached);

    let second = provisioner
        .ensure(&runtime.image, &runtime.dockerfile)
        .await
        .unwrap();
    assert_eq!(second, ProvisionOutcome::Cached);
    assert!(provisioner.is_ready(&runtime.image).await);
}
