//! Gradecube CLI
//!
//! A command-line tool for provisioning runner images and grading answers to
//! exercises in Docker sandboxes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gradecube::{
    AdmissionController, Config, DockerEngine, EXAMPLE_CONFIG, GradingOrchestrator,
    GradingService, ImageProvisioner, InMemorySubmissionStore, InMemoryTaskCatalog, Language,
    RuntimeTable, SandboxExecutor, SubmissionStatus, SubmitAnswer, Task, TaskType,
};
use tracing::{Level, debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gradecube")]
#[command(about = "A tool for grading exercise submissions in sandboxed containers")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new configuration file
    Init {
        /// Output path (default: gradecube.toml)
        #[arg(short, long, default_value = "gradecube.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(short, long)]
        force: bool,
    },

    /// List configured languages
    Languages,

    /// Show the effective configuration
    ShowConfig,

    /// Check that the Docker daemon is reachable
    Check,

    /// Build missing runner images
    Provision {
        /// Only provision this language (e.g., python, java)
        #[arg(short, long)]
        language: Option<Language>,
    },

    /// Grade one answer to a task and print the resulting submission
    Grade {
        /// Task definition (JSON)
        #[arg(short, long, value_name = "FILE")]
        task: PathBuf,

        /// Source file for a code task
        #[arg(long, value_name = "FILE", conflicts_with = "text")]
        code: Option<PathBuf>,

        /// Answer for a text or multiple choice task
        #[arg(long, conflicts_with = "code")]
        text: Option<String>,

        /// Language of the code, if the task does not set one
        #[arg(short, long)]
        language: Option<Language>,

        /// User the answer is recorded for
        #[arg(short, long, default_value = "cli")]
        user: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    // Logs go to stderr so stdout stays clean for piping
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Init { output, force } = &cli.command {
        return init_config(output, *force).await;
    }

    // Load configuration
    if let Some(ref path) = cli.config {
        info!(?path, "loading configuration");
    } else {
        debug!("using default configuration");
    }
    let config =
        Config::from_file_with_env(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Commands::Init { .. } => Ok(()),
        Commands::Languages => {
            list_languages(&config);
            Ok(())
        }
        Commands::ShowConfig => {
            show_config(&config);
            Ok(())
        }
        Commands::Check => check_daemon(&config).await,
        Commands::Provision { language } => provision(&config, language).await,
        Commands::Grade {
            task,
            code,
            text,
            language,
            user,
        } => {
            let status = grade(&config, &task, code.as_deref(), text, language, user).await?;
            if status != SubmissionStatus::Correct {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

async fn check_daemon(config: &Config) -> Result<()> {
    let provisioner = ImageProvisioner::new(Arc::new(DockerEngine::from_config(config)));
    let version = provisioner
        .check_daemon()
        .await
        .context("docker daemon is not reachable")?;
    println!("Docker daemon reachable (server version {version})");
    Ok(())
}

async fn provision(config: &Config, only: Option<Language>) -> Result<()> {
    let table = RuntimeTable::from_config(config).context("failed to resolve runtimes")?;
    let provisioner = ImageProvisioner::new(Arc::new(DockerEngine::from_config(config)));
    provisioner
        .check_daemon()
        .await
        .context("docker daemon is not reachable")?;

    match only {
        Some(language) => {
            let runtime = table
                .get(language)
                .with_context(|| format!("language '{language}' is not configured"))?;
            let outcome = provisioner
                .ensure(&runtime.image, &runtime.dockerfile)
                .await
                .with_context(|| format!("failed to provision {}", runtime.image))?;
            println!("  {:<12} {:<40} {:?}", language, runtime.image, outcome);
        }
        None => {
            let outcomes = table
                .provision_all(&provisioner)
                .await
                .context("failed to provision runner images")?;
            for (language, outcome) in outcomes {
                let image = table.get(language).map_or("", |r| r.image.as_str());
                println!("  {:<12} {:<40} {:?}", language, image, outcome);
            }
        }
    }
    Ok(())
}

async fn grade(
    config: &Config,
    task_path: &Path,
    code: Option<&Path>,
    text: Option<String>,
    language: Option<Language>,
    user: String,
) -> Result<SubmissionStatus> {
    let raw = tokio::fs::read_to_string(task_path)
        .await
        .with_context(|| format!("failed to read task file '{}'", task_path.display()))?;
    let task: Task = serde_json::from_str(&raw).context("failed to parse task file")?;

    let answer_code = match code {
        Some(path) => Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("failed to read code file '{}'", path.display()))?,
        ),
        None => None,
    };
    if task.task_type == TaskType::CodeInput && answer_code.is_none() {
        anyhow::bail!("task '{}' expects code; pass it with --code", task.id);
    }

    let runtimes = Arc::new(RuntimeTable::from_config(config).context("failed to resolve runtimes")?);
    let engine = Arc::new(DockerEngine::from_config(config));

    if task.task_type == TaskType::CodeInput
        && let Some(runtime) = task.language.or(language).and_then(|l| runtimes.get(l))
    {
        ImageProvisioner::new(engine.clone())
            .ensure(&runtime.image, &runtime.dockerfile)
            .await
            .with_context(|| format!("failed to provision {}", runtime.image))?;
    }

    let executor = SandboxExecutor::new(
        engine,
        AdmissionController::new(config.max_concurrent_sandboxes),
        config,
    );
    let store = Arc::new(InMemorySubmissionStore::new());
    let catalog = Arc::new(InMemoryTaskCatalog::new());
    let task_id = task.id.clone();
    catalog.insert(task).await;

    let orchestrator = GradingOrchestrator::new(
        Arc::new(executor),
        store.clone(),
        catalog.clone(),
        runtimes,
        config.output_limits.clone(),
    );
    let service = GradingService::new(orchestrator, store, catalog, config.grading_workers);

    let submitted = service
        .submit_answer(SubmitAnswer {
            user_id: user,
            task_id,
            language,
            answer_code,
            answer_text: text,
            ..Default::default()
        })
        .await
        .context("failed to submit answer")?;

    service.wait_idle().await;
    let submission = service
        .submission(submitted.id)
        .await
        .context("failed to read graded submission")?;

    info!(status = %submission.status, score = ?submission.score, "graded");
    println!(
        "{}",
        serde_json::to_string_pretty(&submission).context("failed to serialize submission")?
    );
    Ok(submission.status)
}

fn list_languages(config: &Config) {
    println!("Configured languages:\n");

    for language in config.configured_languages() {
        if let Ok(runtime) = config.runtime(language) {
            println!("  {:<12} {:<24} {}", language, runtime.name, runtime.image);
        }
    }
}

fn show_config(config: &Config) {
    let limits = &config.default_limits;
    println!("Default resource limits:");
    println!("  Timeout: {:?} s", limits.timeout_seconds);
    println!("  Memory limit: {:?} MB", limits.memory_limit_mb);
    println!(
        "  CPU quota: {:?} / {:?} us",
        limits.cpu_quota_us, limits.cpu_period_us
    );
    println!("  Max processes: {:?}", limits.pids_limit);
    println!("  Max output: {:?} bytes", limits.max_output_bytes);
    println!();
    println!("Isolation policy:");
    println!("  Network disabled: {}", config.policy.network_disabled);
    println!("  Drop capabilities: {}", config.policy.drop_all_capabilities);
    println!("  No new privileges: {}", config.policy.no_new_privileges);
    println!("  Read-only root: {}", config.policy.read_only_rootfs);
    println!("  User: {}", config.policy.user);
    println!();
    println!("Docker binary: {}", config.docker_binary().display());
    println!("Run directory root: {}", config.temp_root().display());
    println!("Concurrent sandboxes: {}", config.max_concurrent_sandboxes);
    println!("Grading workers: {}", config.grading_workers);
    println!();
    println!("Languages configured: {}", config.languages.len());
}

async fn init_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "Configuration file already exists at '{}'. Use --force to overwrite.",
            output.display()
        );
    }

    tokio::fs::write(output, EXAMPLE_CONFIG)
        .await
        .context("failed to write configuration file")?;

    println!("Created configuration file at '{}'", output.display());
    Ok(())
}
