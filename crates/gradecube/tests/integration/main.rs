//! Integration tests for gradecube
//!
//! The pipeline and configuration tests run against a scripted sandbox and
//! need nothing installed.
//!
//! Tests that start real containers need a Docker daemon the current user may
//! talk to. They are gated on a feature and marked `#[ignore]`:
//!    cargo test -p gradecube --features docker-tests -- --include-ignored

use std::fs;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use gradecube::{
    Config, GradingOrchestrator, GradingService, InMemorySubmissionStore, InMemoryTaskCatalog,
    OutputLimits, RuntimeTable, Sandbox, SandboxExecutionResult, SandboxRequest, Task,
};

mod config_loading;
#[cfg(feature = "docker-tests")]
mod docker;
mod pipeline;

const FIXTURES_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures");

/// Helper to get fixture file content
pub(crate) fn fixture(path: &str) -> String {
    let path = format!("{FIXTURES_PATH}/{path}");
    fs::read_to_string(&path).unwrap_or_else(|e| panic!("Failed to read fixture {path}: {e}"))
}

/// Load a task definition from `fixtures/tasks`
pub(crate) fn fixture_task(name: &str) -> Task {
    serde_json::from_str(&fixture(&format!("tasks/{name}")))
        .unwrap_or_else(|e| panic!("Invalid task fixture {name}: {e}"))
}

/// Sandbox that answers every request with a fixed result and keeps the requests
pub(crate) struct ScriptedSandbox {
    result: SandboxExecutionResult,
    requests: Mutex<Vec<SandboxRequest>>,
}

impl ScriptedSandbox {
    pub(crate) fn new(result: SandboxExecutionResult) -> Arc<Self> {
        Arc::new(Self {
            result,
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Runner that printed `stdout` and exited cleanly
    pub(crate) fn printing(stdout: &str) -> Arc<Self> {
        Self::new(SandboxExecutionResult {
            stdout: stdout.to_string(),
            exit_code: 0,
            execution_time_ms: 15,
            ..Default::default()
        })
    }

    pub(crate) fn requests(&self) -> Vec<SandboxRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sandbox for ScriptedSandbox {
    async fn execute(&self, request: SandboxRequest) -> SandboxExecutionResult {
        self.requests.lock().unwrap().push(request);
        self.result.clone()
    }
}

/// A grading service over in-memory storage holding `tasks`
pub(crate) fn service(
    sandbox: Arc<dyn Sandbox>,
    tasks: Vec<Task>,
) -> (GradingService, Arc<InMemorySubmissionStore>) {
    let config = Config::default();
    let store = Arc::new(InMemorySubmissionStore::new());
    let catalog = Arc::new(InMemoryTaskCatalog::with_tasks(tasks));
    let runtimes = Arc::new(RuntimeTable::from_config(&config).expect("default runtimes"));
    let orchestrator = GradingOrchestrator::new(
        sandbox,
        store.clone(),
        catalog.clone(),
        runtimes,
        OutputLimits::default(),
    );
    let service = GradingService::new(orchestrator, store.clone(), catalog, 4);
    (service, store)
}
