//! orderflow CLI - runs image orders from a script through generation,
//! post-processing and upload.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::Ordering;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn, Subscriber};
use tracing_subscriber::EnvFilter;

use orderflow::checkpoint::CheckpointStore;
use orderflow::config::{load_config, AppConfig};
use orderflow::orchestrator::{load_work, Orchestrator, WorkSource};
use orderflow::script::parse_script_file;

#[derive(Parser)]
#[command(name = "orderflow")]
#[command(about = "Generate, post-process and upload image orders", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the application config (created with defaults if missing)
    #[arg(long, global = true, default_value = "data/config.json")]
    config: PathBuf,

    /// Log level filter, overridden by RUST_LOG
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process the script, resuming an unfinished order first
    Run {
        /// Script to load instead of the configured one
        #[arg(long)]
        script: Option<PathBuf>,

        /// Ignore checkpoints and start from the script
        #[arg(long)]
        fresh: bool,
    },

    /// Load and validate a script without running it
    Validate {
        /// Script to validate
        #[arg(long)]
        script: Option<PathBuf>,
    },

    /// List checkpoints, newest first
    Checkpoints,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli.config)
        .with_context(|| format!("loading config {}", cli.config.display()))?;
    init_tracing(cli.log_level.as_deref(), &config.base.log_level, cli.log_json)?;

    match cli.command {
        Commands::Run { script, fresh } => run_orders(&config, script, fresh),
        Commands::Validate { script } => {
            validate_script(&script.unwrap_or_else(|| config.script_path()))
        }
        Commands::Checkpoints => list_checkpoints(&config),
    }
}

/// `RUST_LOG` wins over `--log-level`, which wins over the config.
fn init_tracing(cli_level: Option<&str>, config_level: &str, json: bool) -> Result<()> {
    tracing_log::LogTracer::init().map_err(|e| anyhow!("installing log bridge: {}", e))?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(cli_level.unwrap_or(config_level)))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    let subscriber: Box<dyn Subscriber + Send + Sync> = if json {
        Box::new(builder.json().finish())
    } else {
        Box::new(builder.finish())
    };

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow!("installing tracing subscriber: {}", e))
}

fn run_orders(config: &AppConfig, script: Option<PathBuf>, fresh: bool) -> Result<()> {
    let script = script.unwrap_or_else(|| config.script_path());

    let mut orchestrator =
        Orchestrator::from_config(config).context("starting collaborators")?;

    let stop = orchestrator.stop_handle();
    ctrlc::set_handler(move || {
        if stop.swap(true, Ordering::Relaxed) {
            std::process::exit(130);
        }
        eprintln!("Stopping after the current order (Ctrl-C again to abort)");
    })
    .context("installing Ctrl-C handler")?;

    let work = load_work(orchestrator.store(), &script, fresh, orchestrator.catalog())
        .with_context(|| format!("loading script {}", script.display()))?;
    match &work.source {
        WorkSource::Checkpoint(path) => info!("Resuming order from {}", path.display()),
        WorkSource::Script(path) => info!(
            "Loaded {} orders from {}",
            work.orders.len(),
            path.display()
        ),
    }

    let summary = orchestrator.run(work.mode, work.orders)?;
    if !summary.skipped.is_empty() {
        warn!(
            "Orders not delivered (uploads {:?}), their checkpoints are kept",
            summary.skipped
        );
    }
    if summary.stopped {
        warn!("Stopped early after {} orders", summary.delivered);
    } else {
        info!("Delivered {} orders", summary.delivered);
    }
    Ok(())
}

fn validate_script(path: &Path) -> Result<()> {
    let parsed = parse_script_file(path).with_context(|| format!("reading {}", path.display()))?;

    println!("mode: {}", parsed.mode);
    for info in &parsed.infos {
        println!(
            "  ok       uploads[{}] {} x{} (batch {})",
            info.upload_index, info.website, info.number, info.batch
        );
    }
    for rejected in &parsed.rejected {
        println!("  rejected uploads[{}]: {}", rejected.index, rejected.error);
    }
    println!(
        "{} accepted, {} rejected",
        parsed.infos.len(),
        parsed.rejected.len()
    );
    Ok(())
}

fn list_checkpoints(config: &AppConfig) -> Result<()> {
    let store = CheckpointStore::new(config.orders_dir());
    let entries = store.list()?;
    if entries.is_empty() {
        println!("No checkpoints in {}", store.dir().display());
        return Ok(());
    }

    for entry in entries {
        let status = match CheckpointStore::load(&entry.path) {
            Ok(order) if order.delivered => "delivered".to_string(),
            Ok(order) => format!("resumable ({} images active)", order.sort_by_active().len()),
            Err(e) => format!("invalid: {}", e),
        };
        println!("{}  {}", entry.path.display(), status);
    }
    Ok(())
}
