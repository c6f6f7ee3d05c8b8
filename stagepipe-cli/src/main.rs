//! stagepipe CLI: runs a pipeline document from the terminal.

mod commands;

use clap::Parser;
use stagepipe_core::config::{load_domain_config, load_engine_config, project_dirs};
use stagepipe_core::context::{CHECKPOINT_PATH, NUM_GPUS};
use stagepipe_core::{ComponentRegistry, EngineConfig};
use stagepipe_engine::PipelineOrchestrator;
use stagepipe_plugins::PluginLoader;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

const FALLBACK_PIPELINE: &str = "pipelines/full_pipeline.yaml";

/// stagepipe: configuration-driven stage orchestration
#[derive(Parser, Debug)]
#[command(name = "stagepipe", version, about, long_about = None)]
struct Cli {
    /// Path to the pipeline YAML document
    #[arg(long)]
    pipeline: Option<PathBuf>,

    /// Validate and print the plan without executing stages
    #[arg(long)]
    dry_run: bool,

    /// Model checkpoint path, exposed to stages as `checkpoint_path`
    #[arg(long)]
    checkpoint: Option<String>,

    /// Configuration override tokens, appended after the document's own
    #[arg(long, num_args = 0..)]
    hydra_overrides: Vec<String>,

    /// List all registered components and exit
    #[arg(long)]
    list_components: bool,

    /// Number of GPUs, exposed to stages as `num_gpus`
    #[arg(long, default_value_t = 1)]
    num_gpus: u32,

    /// Domain configuration file (TOML, YAML or JSON) passed to every stage
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Extra directory to search for plugin libraries (repeatable)
    #[arg(long = "plugin-dir")]
    plugin_dirs: Vec<PathBuf>,

    /// Workspace directory
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> ExitCode {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let engine_config = match load_engine_config(Some(&workspace)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let _guard = init_tracing(&cli, &engine_config);

    match run(cli, engine_config, &workspace) {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "stagepipe failed");
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Human-readable stderr layer plus an optional JSON file layer.
fn init_tracing(
    cli: &Cli,
    config: &EngineConfig,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => config.logging.level.as_str(),
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    if !config.logging.json_file {
        tracing_subscriber::registry().with(stderr_layer).init();
        return None;
    }

    let log_dir = project_dirs()
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "stagepipe.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();
    Some(guard)
}

fn run(cli: Cli, engine_config: EngineConfig, workspace: &Path) -> anyhow::Result<ExitCode> {
    let mut loader = PluginLoader::new();
    for dir in engine_config.plugin_dirs.iter().chain(&cli.plugin_dirs) {
        loader.add_search_dir(workspace.join(dir));
    }

    if cli.list_components {
        let registry = ComponentRegistry::global();
        commands::list_components(&registry, &mut loader);
        return Ok(ExitCode::SUCCESS);
    }

    let pipeline_path = cli
        .pipeline
        .clone()
        .or_else(|| engine_config.default_pipeline.clone())
        .unwrap_or_else(|| PathBuf::from(FALLBACK_PIPELINE));
    if !pipeline_path.exists() {
        eprintln!("Error: Pipeline config not found: {}", pipeline_path.display());
        return Ok(ExitCode::FAILURE);
    }

    let domain_config = cli
        .config
        .as_deref()
        .map(load_domain_config)
        .transpose()?;

    let mut orchestrator = PipelineOrchestrator::from_path(&pipeline_path, domain_config, cli.dry_run)?
        .with_plugin_loader(loader);

    if let Some(checkpoint) = &cli.checkpoint {
        orchestrator
            .context_mut()
            .insert(CHECKPOINT_PATH.into(), serde_json::json!(checkpoint));
    }
    orchestrator
        .context_mut()
        .insert(NUM_GPUS.into(), serde_json::json!(cli.num_gpus));
    orchestrator.add_overrides(cli.hydra_overrides);

    info!(pipeline = %pipeline_path.display(), dry_run = cli.dry_run, "Starting pipeline");
    let context = orchestrator.run()?;

    if cli.dry_run {
        commands::print_plan(&orchestrator);
        return Ok(ExitCode::SUCCESS);
    }

    Ok(commands::report(&context))
}
