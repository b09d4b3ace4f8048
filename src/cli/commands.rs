//! CLI command definitions for swe-testbed.
//!
//! Batch commands read task records from JSONL and write one result record
//! per task. The remaining commands expose single pieces of the harness
//! (report normalization, cache planning, volume maintenance) for debugging.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use crate::cache::{plan_cache_mounts, volume_name, CacheMode};
use crate::config::{BackendKind, HarnessConfig};
use crate::evaluation::Evaluator;
use crate::execution::{DockerClient, LocalBackend, SandboxBackend};
use crate::language::Language;
use crate::report::{normalize, TestReport};
use crate::scheduler::{DispatchMode, DispatchSummary, Dispatcher, DispatcherConfig};
use crate::task::read_tasks_with_timeouts;

/// Sandboxed multi-language test harness.
#[derive(Parser)]
#[command(name = "swe-testbed")]
#[command(about = "Build repositories and evaluate patches against their test suites")]
#[command(version)]
#[command(
    long_about = "swe-testbed checks out a repository at a commit, builds it in a sandbox and runs its tests before and after a test patch and a candidate patch.\n\nExample usage:\n  swe-testbed run -i tasks.jsonl -o results.jsonl --n-jobs 4"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// YAML configuration file layered over defaults and environment.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Evaluate every task: build, then run tests before and after patching.
    #[command(alias = "eval")]
    Run(RunArgs),

    /// Only check that each task builds and has at least one passing test.
    Probe(ProbeArgs),

    /// Normalize test report files and print the canonical JSON report.
    Parse(ParseArgs),

    /// Print the cache mounts a sandbox would receive.
    CachePlan(CachePlanArgs),

    /// Manage named cache volumes.
    Volumes(VolumesArgs),
}

/// Options shared by batch commands.
#[derive(clap::Args, Debug, Clone)]
pub struct BatchArgs {
    /// Input JSONL file of task records.
    #[arg(short, long)]
    pub input: PathBuf,

    /// Output JSONL file of result records.
    #[arg(short, long)]
    pub output: PathBuf,

    /// Number of tasks evaluated concurrently.
    #[arg(short = 'n', long)]
    pub n_jobs: Option<usize>,

    /// Cache mode for package caches.
    #[arg(long, value_enum)]
    pub cache_mode: Option<CacheMode>,

    /// Sandbox backend.
    #[arg(long, value_enum)]
    pub backend: Option<BackendKind>,

    /// Root directory of cloned working trees.
    #[arg(long)]
    pub cache_root: Option<PathBuf>,

    /// Build timeout in seconds for tasks that do not set one.
    #[arg(long)]
    pub timeout_build: Option<u64>,

    /// Test timeout in seconds for tasks that do not set one.
    #[arg(long)]
    pub timeout_test: Option<u64>,

    /// Language assumed for tasks that do not name one.
    #[arg(long)]
    pub language: Option<Language>,

    /// Keep sandboxes after each phase for inspection.
    #[arg(long)]
    pub keep_containers: bool,

    /// Do not snapshot successful builds as images.
    #[arg(long)]
    pub no_commit: bool,

    /// Append to the output and skip tasks already recorded in it.
    #[arg(long)]
    pub resume: bool,

    /// Print the batch summary as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `swe-testbed run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub batch: BatchArgs,

    /// Drop raw phase results from output records.
    #[arg(long)]
    pub delete_log: bool,

    /// Run only the test files touched by the test patch when the language
    /// supports it.
    #[arg(long)]
    pub focused: bool,
}

/// Arguments for `swe-testbed probe`.
#[derive(Parser, Debug)]
pub struct ProbeArgs {
    #[command(flatten)]
    pub batch: BatchArgs,
}

/// Arguments for `swe-testbed parse`.
#[derive(Parser, Debug)]
pub struct ParseArgs {
    /// Report files (JUnit XML, JSON, NDJSON or console logs).
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Language whose console dialects are tried first.
    #[arg(long)]
    pub language: Option<Language>,
}

/// Arguments for `swe-testbed cache-plan`.
#[derive(Parser, Debug)]
pub struct CachePlanArgs {
    #[arg(long, default_value = "python")]
    pub language: Language,

    /// Cache mode; defaults to the configured one.
    #[arg(long, value_enum)]
    pub mode: Option<CacheMode>,

    /// Host working tree the plan is computed for.
    #[arg(long, default_value = ".")]
    pub workdir: PathBuf,

    /// Print the plan as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `swe-testbed volumes`.
#[derive(Parser, Debug)]
pub struct VolumesArgs {
    #[command(subcommand)]
    pub command: VolumesSubcommand,
}

#[derive(clap::Subcommand, Debug)]
pub enum VolumesSubcommand {
    /// Remove the cache volumes of one language, or of all languages.
    Prune {
        #[arg(long)]
        language: Option<Language>,

        #[arg(long, value_enum)]
        backend: Option<BackendKind>,
    },
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Run(args) => {
            run_evaluate_command(config_path, args).await?;
        }
        Commands::Probe(args) => {
            run_probe_command(config_path, args).await?;
        }
        Commands::Parse(args) => {
            run_parse_command(args)?;
        }
        Commands::CachePlan(args) => {
            run_cache_plan_command(config_path, args)?;
        }
        Commands::Volumes(args) => {
            run_volumes_command(config_path, args).await?;
        }
    }
    Ok(())
}

// ============================================================================
// Batch commands
// ============================================================================

async fn run_evaluate_command(config_path: Option<&Path>, args: RunArgs) -> anyhow::Result<()> {
    let mut config = resolve_config(config_path, &args.batch)?;
    if args.delete_log {
        config = config.with_delete_log(true);
    }
    let dispatcher_config = DispatcherConfig::new(config.n_jobs)
        .with_mode(DispatchMode::Evaluate)
        .with_delete_log(config.delete_log)
        .with_resume(args.batch.resume);

    let summary = run_batch(&config, &args.batch, dispatcher_config, args.focused).await?;
    print_summary("Evaluation", &summary, args.batch.json)
}

async fn run_probe_command(config_path: Option<&Path>, args: ProbeArgs) -> anyhow::Result<()> {
    let config = resolve_config(config_path, &args.batch)?;
    let dispatcher_config = DispatcherConfig::new(config.n_jobs)
        .with_mode(DispatchMode::Probe)
        .with_resume(args.batch.resume);

    let summary = run_batch(&config, &args.batch, dispatcher_config, false).await?;
    print_summary("Build probe", &summary, args.batch.json)
}

/// Configuration with command-line flags applied last.
fn resolve_config(config_path: Option<&Path>, batch: &BatchArgs) -> anyhow::Result<HarnessConfig> {
    let mut config = HarnessConfig::load(config_path)?;

    if let Some(n_jobs) = batch.n_jobs {
        config = config.with_n_jobs(n_jobs);
    }
    if let Some(mode) = batch.cache_mode {
        config = config.with_cache_mode(mode);
    }
    if let Some(backend) = batch.backend {
        config = config.with_backend(backend);
    }
    if let Some(root) = &batch.cache_root {
        config = config.with_cache_root(root);
    }
    if let Some(language) = batch.language {
        config = config.with_default_language(language);
    }
    let build = batch.timeout_build.unwrap_or(config.timeout_build);
    let test = batch.timeout_test.unwrap_or(config.timeout_test);
    config = config.with_timeouts(build, test);
    if batch.keep_containers {
        config = config.with_keep_containers(true);
    }
    if batch.no_commit {
        config = config.with_commit_image(false);
    }

    config.validate()?;
    Ok(config)
}

async fn build_backend(kind: BackendKind) -> anyhow::Result<Arc<dyn SandboxBackend>> {
    match kind {
        BackendKind::Docker => {
            let client = DockerClient::new()?;
            client.ping().await?;
            Ok(Arc::new(client))
        }
        BackendKind::Local => Ok(Arc::new(LocalBackend::new())),
    }
}

async fn run_batch(
    config: &HarnessConfig,
    batch: &BatchArgs,
    dispatcher_config: DispatcherConfig,
    focused: bool,
) -> anyhow::Result<DispatchSummary> {
    if !batch.input.exists() {
        return Err(anyhow::anyhow!(
            "Input file does not exist: {}",
            batch.input.display()
        ));
    }

    let tasks = read_tasks_with_timeouts(&batch.input, config.timeout_build, config.timeout_test)?;
    info!(
        "Loaded {} tasks from {}",
        tasks.len(),
        batch.input.display()
    );

    let backend = build_backend(config.backend).await?;
    let evaluator = Evaluator::new(backend, config.handle_settings())
        .with_default_language(config.default_language)
        .with_focused(focused);
    let dispatcher = Dispatcher::new(
        evaluator,
        dispatcher_config.with_progress_interval(Duration::from_secs(config.progress_interval)),
    );

    Ok(dispatcher.run(tasks, &batch.output).await?)
}

fn print_summary(title: &str, summary: &DispatchSummary, json: bool) -> anyhow::Result<()> {
    if json {
        let json = serde_json::to_string_pretty(summary)?;
        println!("{json}");
        return Ok(());
    }

    let stats = &summary.stats;
    println!("\n=== {title} Results ===");
    println!("Input tasks:    {}", summary.input_tasks);
    println!("Resumed:        {}", summary.resumed);
    println!("Written:        {}", summary.written);
    println!("Evaluated:      {}", stats.evaluated);
    println!("Skipped:        {}", stats.skipped);
    println!("Errored:        {}", stats.errored);
    println!("Task ok:        {}", stats.task_ok);
    println!("Task perfect:   {}", stats.task_perfect);
    println!(
        "Avg task time:  {:.1}s",
        stats.average_task_duration.as_secs_f64()
    );
    println!("Output:         {}", summary.output.display());
    Ok(())
}

// ============================================================================
// Inspection commands
// ============================================================================

fn run_parse_command(args: ParseArgs) -> anyhow::Result<()> {
    let hints = args
        .language
        .map(|language| language.profile().text_dialects)
        .unwrap_or(&[]);

    let mut reports = Vec::with_capacity(args.files.len());
    for path in &args.files {
        let bytes = std::fs::read(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
        reports.push(normalize(&bytes, hints));
    }

    let report = if reports.len() == 1 {
        reports.remove(0)
    } else {
        TestReport::merge(reports)
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn run_cache_plan_command(config_path: Option<&Path>, args: CachePlanArgs) -> anyhow::Result<()> {
    let config = HarnessConfig::load(config_path)?;
    let mode = args.mode.unwrap_or(config.cache_mode);
    let home = dirs::home_dir();
    let plan = plan_cache_mounts(mode, args.language.profile(), &args.workdir, home.as_deref());

    if args.json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else if plan.is_empty() {
        println!("No cache mounts for {} in {} mode", args.language, mode);
    } else {
        for bind in plan.bind_strings() {
            println!("{bind}");
        }
    }
    Ok(())
}

async fn run_volumes_command(config_path: Option<&Path>, args: VolumesArgs) -> anyhow::Result<()> {
    match args.command {
        VolumesSubcommand::Prune { language, backend } => {
            let config = HarnessConfig::load(config_path)?;
            let backend = build_backend(backend.unwrap_or(config.backend)).await?;
            let names = prunable_volumes(language);

            let mut removed = 0usize;
            for name in &names {
                match backend.remove_volume(name).await {
                    Ok(()) => {
                        removed += 1;
                        println!("removed {name}");
                    }
                    Err(e) => tracing::warn!(volume = %name, error = %e, "Failed to remove volume"),
                }
            }
            info!("Removed {}/{} cache volumes", removed, names.len());
        }
    }
    Ok(())
}

/// Volume names used by `language`, or by every language.
fn prunable_volumes(language: Option<Language>) -> BTreeSet<String> {
    let languages: Vec<Language> = match language {
        Some(language) => vec![language],
        None => Language::ALL.to_vec(),
    };
    languages
        .iter()
        .flat_map(|language| language.profile().caches.iter())
        .map(|cache| volume_name(cache.name))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_flags() {
        let cli = Cli::try_parse_from([
            "swe-testbed",
            "run",
            "-i",
            "tasks.jsonl",
            "-o",
            "out.jsonl",
            "--n-jobs",
            "4",
            "--cache-mode",
            "local",
            "--backend",
            "local",
            "--delete-log",
            "--language",
            "go",
        ])
        .unwrap();
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.batch.n_jobs, Some(4));
                assert_eq!(args.batch.cache_mode, Some(CacheMode::Local));
                assert_eq!(args.batch.backend, Some(BackendKind::Local));
                assert_eq!(args.batch.language, Some(Language::Go));
                assert!(args.delete_log);
                assert!(!args.focused);
            }
            _ => panic!("expected run"),
        }
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "swe-testbed",
            "probe",
            "-i",
            "a",
            "-o",
            "b",
            "--log-level",
            "debug",
            "--config",
            "harness.yaml",
        ])
        .unwrap();
        assert_eq!(cli.log_level, "debug");
        assert_eq!(cli.config, Some(PathBuf::from("harness.yaml")));
    }

    #[test]
    fn test_resolve_config_flags_override() {
        let args = BatchArgs {
            input: PathBuf::from("in"),
            output: PathBuf::from("out"),
            n_jobs: Some(3),
            cache_mode: Some(CacheMode::Download),
            backend: Some(BackendKind::Local),
            cache_root: Some(PathBuf::from("/tmp/testbed")),
            timeout_build: None,
            timeout_test: Some(42),
            language: Some(Language::Rust),
            keep_containers: true,
            no_commit: true,
            resume: false,
            json: false,
        };
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("harness.yaml");
        std::fs::write(&file, "timeout_build: 77\nn_jobs: 9\n").unwrap();

        let config = resolve_config(Some(file.as_path()), &args).unwrap();
        assert_eq!(config.n_jobs, 3);
        assert_eq!(config.timeout_build, 77);
        assert_eq!(config.timeout_test, 42);
        assert_eq!(config.cache_mode, CacheMode::Download);
        assert_eq!(config.backend, BackendKind::Local);
        assert_eq!(config.cache_root, PathBuf::from("/tmp/testbed"));
        assert_eq!(config.default_language, Language::Rust);
        assert!(config.keep_containers);
        assert!(!config.commit_image);
    }

    #[test]
    fn test_resolve_config_rejects_zero_jobs() {
        let args = BatchArgs {
            input: PathBuf::from("in"),
            output: PathBuf::from("out"),
            n_jobs: Some(0),
            cache_mode: None,
            backend: None,
            cache_root: None,
            timeout_build: None,
            timeout_test: None,
            language: None,
            keep_containers: false,
            no_commit: false,
            resume: false,
            json: false,
        };
        assert!(resolve_config(None, &args).is_err());
    }

    #[test]
    fn test_prunable_volumes() {
        let python = prunable_volumes(Some(Language::Python));
        assert!(python.contains("swe-testbed-pip"));
        assert!(python.iter().all(|name| name.starts_with("swe-testbed-")));

        let all = prunable_volumes(None);
        assert!(all.is_superset(&python));
        assert!(all.len() > python.len());
    }
}
