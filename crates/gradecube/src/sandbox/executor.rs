//! Sandbox executor
//!
//! Runs one [`SandboxRequest`] in a fresh container: admission, run
//! directory, container lifecycle, timeout, output collection and cleanup.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::sandbox::admission::{AdmissionController, AdmissionError};
use crate::sandbox::engine::{ContainerEngine, ContainerOutput, ContainerSpec};
use crate::sandbox::workspace::RunWorkspace;
use crate::sandbox::{Sandbox, SandboxError};
use crate::types::{
    IsolationPolicy, MountConfig, ResourceLimits, SandboxExecutionResult, SandboxFailure,
    SandboxRequest,
};

/// Executes requests in containers created through a [`ContainerEngine`]
#[derive(Debug)]
pub struct SandboxExecutor<E: ContainerEngine> {
    engine: Arc<E>,
    admission: AdmissionController,
    policy: IsolationPolicy,
    temp_root: PathBuf,
    admission_grace: Duration,
    log_drain: Duration,
}

impl<E: ContainerEngine> SandboxExecutor<E> {
    pub fn new(engine: Arc<E>, admission: AdmissionController, config: &Config) -> Self {
        Self {
            engine,
            admission,
            policy: config.policy.clone(),
            temp_root: config.temp_root(),
            admission_grace: config.admission_grace(),
            log_drain: config.log_drain(),
        }
    }

    /// Get the admission pool shared by this executor
    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    /// Run a request and report the outcome
    #[instrument(skip(self, request), fields(image = %request.image))]
    pub async fn run(&self, request: SandboxRequest) -> SandboxExecutionResult {
        let wait = Duration::from_secs(request.limits.timeout()).saturating_add(self.admission_grace);
        let permit = match self.admission.acquire(wait).await {
            Ok(permit) => permit,
            Err(AdmissionError::Busy) => {
                warn!(?wait, "no sandbox permit available");
                return SandboxExecutionResult::failed(SandboxFailure::Busy);
            }
            Err(AdmissionError::Closed) => {
                warn!("admission pool closed while waiting");
                return SandboxExecutionResult::failed(SandboxFailure::Interrupted);
            }
        };

        let result = match self.run_admitted(&request).await {
            Ok(result) => result,
            Err(e) if e.is_provisioning() => {
                error!(error = %e, "sandbox unavailable");
                SandboxExecutionResult::failed(e.into_failure())
            }
            Err(e) => {
                warn!(error = %e, "sandbox run failed");
                SandboxExecutionResult::failed(e.into_failure())
            }
        };

        drop(permit);
        debug!(
            exit_code = result.exit_code,
            time_ms = result.execution_time_ms,
            failure = ?result.error,
            "sandbox run finished"
        );
        result
    }

    async fn run_admitted(
        &self,
        request: &SandboxRequest,
    ) -> Result<SandboxExecutionResult, SandboxError> {
        let run_id = Uuid::new_v4();
        let workspace = RunWorkspace::create(&self.temp_root, run_id).await?;
        workspace.write_files(&request.files).await?;

        let spec = ContainerSpec {
            name: format!("gradecube-{}", run_id.simple()),
            image: request.image.clone(),
            command: request.command.clone(),
            env: request.env.clone(),
            mounts: vec![MountConfig {
                source: workspace.path().to_string_lossy().into_owned(),
                target: self.policy.mount_path.clone(),
                writable: false,
            }],
            limits: request.limits.clone(),
            policy: self.policy.clone(),
        };

        let id = self.engine.create_container(&spec).await?;
        let mut container = ContainerGuard::new(self.engine.clone(), id);

        let outcome = self.supervise(container.id(), &request.limits).await;

        if let Err(e) = container.remove().await {
            warn!(container = container.id(), error = %e, "failed to remove container");
        }
        if let Err(e) = workspace.close() {
            warn!(error = %e, "failed to remove run directory");
        }

        outcome
    }

    /// Start the container, enforce the timeout and collect its output
    async fn supervise(
        &self,
        id: &str,
        limits: &ResourceLimits,
    ) -> Result<SandboxExecutionResult, SandboxError> {
        let timeout = limits.timeout();
        let started = Instant::now();
        self.engine.start_container(id).await?;

        let exit = match tokio::time::timeout(
            Duration::from_secs(timeout),
            self.engine.wait_container(id),
        )
        .await
        {
            Ok(exit) => Some(exit?),
            Err(_) => {
                warn!(container = id, timeout, "container timed out, killing");
                if let Err(e) = self.engine.kill_container(id).await {
                    warn!(container = id, error = %e, "failed to kill container");
                }
                None
            }
        };
        let elapsed = started.elapsed();

        let output = self.collect_output(id, limits.output_cap()).await;

        let error = match exit {
            None => Some(SandboxFailure::TimedOut { seconds: timeout }),
            Some(exit) if exit.oom_killed => Some(SandboxFailure::MemoryExhausted),
            Some(_) => None,
        };

        Ok(SandboxExecutionResult {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: exit.map_or(-1, |exit| exit.code),
            execution_time_ms: elapsed.as_millis().try_into().unwrap_or(u64::MAX),
            error,
        })
    }

    /// Collect logs within the drain budget; missing output is not a failure
    async fn collect_output(&self, id: &str, cap: u64) -> ContainerOutput {
        let cap = usize::try_from(cap).unwrap_or(usize::MAX);
        match tokio::time::timeout(self.log_drain, self.engine.container_logs(id, cap)).await {
            Ok(Ok(output)) => {
                if output.truncated {
                    debug!(container = id, cap, "container output truncated");
                }
                output
            }
            Ok(Err(e)) => {
                warn!(container = id, error = %e, "failed to collect container output");
                ContainerOutput::default()
            }
            Err(_) => {
                warn!(container = id, "timed out collecting container output");
                ContainerOutput::default()
            }
        }
    }
}

#[async_trait]
impl<E: ContainerEngine> Sandbox for SandboxExecutor<E> {
    async fn execute(&self, request: SandboxRequest) -> SandboxExecutionResult {
        self.run(request).await
    }
}

/// Owns a created container until it is removed
struct ContainerGuard<E: ContainerEngine> {
    engine: Arc<E>,
    id: String,
    removed: bool,
}

impl<E: ContainerEngine> ContainerGuard<E> {
    fn new(engine: Arc<E>, id: String) -> Self {
        Self {
            engine,
            id,
            removed: false,
        }
    }

    fn id(&self) -> &str {
        &self.id
    }

    async fn remove(&mut self) -> Result<(), SandboxError> {
        self.engine.remove_container(&self.id).await?;
        self.removed = true;
        Ok(())
    }
}

impl<E: ContainerEngine> Drop for ContainerGuard<E> {
    fn drop(&mut self) {
        if !self.removed {
            warn!(
                container = %self.id,
                "container dropped without removal, attempting best-effort forced removal"
            );
            self.engine.remove_detached(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashSet};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::sandbox::engine::ContainerExit;

    /// Scripted engine that records container lifecycle calls
    #[derive(Default)]
    struct FakeEngine {
        run_for: Duration,
        exit_code: i64,
        oom_killed: bool,
        stdout: String,
        fail_create: Option<&'static str>,
        fail_remove: bool,
        alive: Mutex<HashSet<String>>,
        peak_alive: AtomicUsize,
        created: AtomicUsize,
        killed: Mutex<Vec<String>>,
        detached: Mutex<Vec<String>>,
        last_spec: Mutex<Option<ContainerSpec>>,
    }

    #[async_trait]
    impl ContainerEngine for FakeEngine {
        async fn ping(&self) -> Result<String, SandboxError> {
            Ok("fake".to_string())
        }

        async fn image_exists(&self, _image: &str) -> Result<bool, SandboxError> {
            Ok(true)
        }

        async fn build_image(&self, _image: &str, _dockerfile: &str) -> Result<(), SandboxError> {
            Ok(())
        }

        async fn create_container(&self, spec: &ContainerSpec) -> Result<String, SandboxError> {
            if let Some(stderr) = self.fail_create {
                return Err(SandboxError::from_engine_stderr(stderr));
            }
            let n = self.created.fetch_add(1, Ordering::SeqCst);
            let id = format!("container-{n}");
            let mut alive = self.alive.lock().unwrap();
            alive.insert(id.clone());
            self.peak_alive.fetch_max(alive.len(), Ordering::SeqCst);
            *self.last_spec.lock().unwrap() = Some(spec.clone());
            Ok(id)
        }

        async fn start_container(&self, _id: &str) -> Result<(), SandboxError> {
            Ok(())
        }

        async fn wait_container(&self, _id: &str) -> Result<ContainerExit, SandboxError> {
            tokio::time::sleep(self.run_for).await;
            Ok(ContainerExit {
                code: self.exit_code,
                oom_killed: self.oom_killed,
            })
        }

        async fn kill_container(&self, id: &str) -> Result<(), SandboxError> {
            self.killed.lock().unwrap().push(id.to_string());
            Ok(())
        }

        async fn container_logs(
            &self,
            _id: &str,
            max_bytes: usize,
        ) -> Result<ContainerOutput, SandboxError> {
            let mut stdout = self.stdout.clone();
            let truncated = stdout.len() > max_bytes;
            stdout.truncate(max_bytes);
            Ok(ContainerOutput {
                stdout,
                stderr: String::new(),
                truncated,
            })
        }

        async fn remove_container(&self, id: &str) -> Result<(), SandboxError> {
            if self.fail_remove {
                return Err(SandboxError::CommandFailed("removal refused".to_string()));
            }
            self.alive.lock().unwrap().remove(id);
            Ok(())
        }

        fn remove_detached(&self, id: &str) {
            self.detached.lock().unwrap().push(id.to_string());
            self.alive.lock().unwrap().remove(id);
        }
    }

    fn executor(engine: FakeEngine, pool: usize, root: &std::path::Path) -> SandboxExecutor<FakeEngine> {
        let config = Config {
            temp_root: Some(root.to_path_buf()),
            admission_grace_seconds: 0,
            log_drain_seconds: 1,
            ..Config::empty()
        };
        SandboxExecutor::new(Arc::new(engine), AdmissionController::new(pool), &config)
    }

    fn request(timeout: u64) -> SandboxRequest {
        SandboxRequest {
            image: "runner:test".to_string(),
            command: vec!["python".to_string(), "run_tests.py".to_string()],
            files: BTreeMap::from([("student_code.py".to_string(), "x = 1".to_string())]),
            env: BTreeMap::new(),
            limits: ResourceLimits::default().with_timeout(timeout),
        }
    }

    fn leftover_dirs(root: &std::path::Path) -> usize {
        std::fs::read_dir(root).map(|d| d.count()).unwrap_or(0)
    }

    #[tokio::test]
    async fn test_successful_run() {
        let root = tempfile::tempdir().unwrap();
        let engine = FakeEngine {
            stdout: "{\"test_results\":[]}".to_string(),
            ..Default::default()
        };
        let executor = executor(engine, 2, root.path());

        let result = executor.run(request(5)).await;

        assert!(result.is_success());
        assert_eq!(result.stdout, "{\"test_results\":[]}");
        assert_eq!(leftover_dirs(root.path()), 0);
        assert!(executor.engine().alive.lock().unwrap().is_empty());
        assert_eq!(executor.admission().available(), 2);
    }

    #[tokio::test]
    async fn test_container_spec_mounts_run_dir_read_only() {
        let root = tempfile::tempdir().unwrap();
        let executor = executor(FakeEngine::default(), 1, root.path());

        executor.run(request(5)).await;

        let spec = executor.engine().last_spec.lock().unwrap().clone().unwrap();
        assert!(spec.name.starts_with("gradecube-"));
        assert_eq!(spec.mounts.len(), 1);
        assert!(!spec.mounts[0].writable);
        assert_eq!(spec.mounts[0].target, "/usr/src/app/run_dir");
        assert!(spec.mounts[0].source.starts_with(&*root.path().to_string_lossy()));
        assert!(spec.policy.network_disabled);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_not_an_error() {
        let root = tempfile::tempdir().unwrap();
        let engine = FakeEngine {
            exit_code: 1,
            ..Default::default()
        };
        let result = executor(engine, 1, root.path()).run(request(5)).await;

        assert_eq!(result.exit_code, 1);
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_timeout_kills_and_cleans_up() {
        let root = tempfile::tempdir().unwrap();
        let engine = FakeEngine {
            run_for: Duration::from_secs(30),
            ..Default::default()
        };
        let executor = executor(engine, 1, root.path());

        let result = executor.run(request(1)).await;

        assert_eq!(result.error, Some(SandboxFailure::TimedOut { seconds: 1 }));
        assert!(result.error.as_ref().unwrap().is_timeout());
        assert_eq!(result.exit_code, -1);
        assert_eq!(executor.engine().killed.lock().unwrap().len(), 1);
        assert!(executor.engine().alive.lock().unwrap().is_empty());
        assert_eq!(leftover_dirs(root.path()), 0);
        assert_eq!(executor.admission().available(), 1);
    }

    #[tokio::test]
    async fn test_huge_timeout_is_clamped() {
        let root = tempfile::tempdir().unwrap();
        let executor = executor(FakeEngine::default(), 1, root.path());
        let mut req = request(5);
        req.limits.timeout_seconds = Some(u64::MAX);

        let result = executor.run(req).await;

        assert!(result.is_success());
        assert_eq!(executor.admission().available(), 1);
    }

    #[tokio::test]
    async fn test_oom_reported() {
        let root = tempfile::tempdir().unwrap();
        let engine = FakeEngine {
            exit_code: 137,
            oom_killed: true,
            ..Default::default()
        };
        let result = executor(engine, 1, root.path()).run(request(5)).await;

        assert_eq!(result.error, Some(SandboxFailure::MemoryExhausted));
        assert_eq!(result.exit_code, 137);
    }

    #[tokio::test]
    async fn test_missing_image_is_provisioning_failure() {
        let root = tempfile::tempdir().unwrap();
        let engine = FakeEngine {
            fail_create: Some("Error response from daemon: No such image: runner:test"),
            ..Default::default()
        };
        let executor = executor(engine, 1, root.path());

        let result = executor.run(request(5)).await;

        assert!(matches!(result.error, Some(SandboxFailure::Provisioning(_))));
        assert_eq!(leftover_dirs(root.path()), 0);
        assert_eq!(executor.admission().available(), 1);
    }

    #[tokio::test]
    async fn test_failed_removal_falls_back_to_detached() {
        let root = tempfile::tempdir().unwrap();
        let engine = FakeEngine {
            fail_remove: true,
            ..Default::default()
        };
        let executor = executor(engine, 1, root.path());

        let result = executor.run(request(5)).await;

        assert!(result.error.is_none());
        assert_eq!(executor.engine().detached.lock().unwrap().len(), 1);
        assert!(executor.engine().alive.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_busy_when_pool_exhausted() {
        let root = tempfile::tempdir().unwrap();
        let executor = executor(FakeEngine::default(), 1, root.path());
        let _held = executor.admission().try_acquire().unwrap();

        let started = Instant::now();
        let result = executor.run(request(1)).await;

        assert_eq!(result.error, Some(SandboxFailure::Busy));
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert_eq!(executor.engine().created.load(Ordering::SeqCst), 0);
        assert_eq!(leftover_dirs(root.path()), 0);
    }

    #[tokio::test]
    async fn test_closed_pool_is_interrupted() {
        let root = tempfile::tempdir().unwrap();
        let executor = executor(FakeEngine::default(), 1, root.path());
        executor.admission().close();

        let result = executor.run(request(1)).await;
        assert_eq!(result.error, Some(SandboxFailure::Interrupted));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_bounded_by_pool() {
        let root = tempfile::tempdir().unwrap();
        let engine = FakeEngine {
            run_for: Duration::from_millis(100),
            ..Default::default()
        };
        let executor = Arc::new(executor(engine, 2, root.path()));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let executor = executor.clone();
            handles.push(tokio::spawn(async move { executor.run(request(5)).await }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().error.is_none());
        }

        assert_eq!(executor.engine().created.load(Ordering::SeqCst), 6);
        assert!(executor.engine().peak_alive.load(Ordering::SeqCst) <= 2);
        assert_eq!(executor.admission().available(), 2);
        assert_eq!(leftover_dirs(root.path()), 0);
    }

    #[tokio::test]
    async fn test_output_capped() {
        let root = tempfile::tempdir().unwrap();
        let engine = FakeEngine {
            stdout: "x".repeat(100),
            ..Default::default()
        };
        let mut req = request(5);
        req.limits = req.limits.with_max_output(10);

        let result = executor(engine, 1, root.path()).run(req).await;
        assert_eq!(result.stdout.len(), 10);
    }
}
