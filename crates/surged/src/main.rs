//! surged — the Surge autoscaling daemon.
//!
//! Single binary that assembles the control plane:
//! - State store (redb), acting as orchestrator and secret store
//! - Scaler registry with the built-in trigger types
//! - Scale handler + per-object scale loops
//! - Reconciler and resync controller
//!
//! # Usage
//!
//! ```text
//! surged standalone --data-dir /var/lib/surge --manifest surge.toml
//! ```

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use surge_autoscale::{ScaleHandler, ScaleLoopManager};
use surge_controller::{Controller, Reconciler};
use surge_scalers::ScalerRegistry;
use surge_state::{Orchestrator, SecretStore, StateStore};

use config::{DaemonConfig, LogFormat, Manifest};

const DEFAULT_LOG_FILTER: &str = "info,surged=debug,surge=debug";

#[derive(Parser)]
#[command(name = "surged", about = "Surge event-driven autoscaling daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run in standalone mode (embedded store, all subsystems in one process).
    Standalone {
        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/surge")]
        data_dir: PathBuf,

        /// Daemon configuration file (TOML).
        #[arg(long)]
        config: Option<PathBuf>,

        /// Resource manifest applied to the store at startup.
        #[arg(long)]
        manifest: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Standalone {
            data_dir,
            config,
            manifest,
        } => {
            let config = match config {
                Some(path) => DaemonConfig::from_file(&path)?,
                None => DaemonConfig::default(),
            };
            init_tracing(config.log_format);
            run_standalone(data_dir, config, manifest).await
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

async fn run_standalone(
    data_dir: PathBuf,
    config: DaemonConfig,
    manifest: Option<PathBuf>,
) -> anyhow::Result<()> {
    info!("Surge daemon starting in standalone mode");

    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join("surge.redb");

    // ── Initialize subsystems ──────────────────────────────────

    let state = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    if let Some(path) = manifest {
        let summary = Manifest::from_file(&path)?.apply(&state)?;
        info!(
            path = ?path,
            applied = summary.applied,
            pruned = summary.pruned,
            "manifest applied"
        );
    }

    let orchestrator: Arc<dyn Orchestrator> = Arc::new(state.clone());
    let secrets: Arc<dyn SecretStore> = Arc::new(state);

    let registry = ScalerRegistry::with_builtins();
    info!(trigger_types = ?registry.trigger_types(), "scaler registry initialized");

    let handler = Arc::new(ScaleHandler::new(
        orchestrator.clone(),
        secrets,
        Arc::new(registry),
        config.handler(),
    ));
    let loops = ScaleLoopManager::new(handler);
    let reconciler = Arc::new(Reconciler::new(orchestrator, loops));
    let controller = Controller::new(reconciler, config.resync_interval());
    info!(
        resync_secs = config.resync_interval_secs,
        measure_timeout_secs = config.measure_timeout_secs,
        "controller initialized"
    );

    // ── Run until Ctrl-C ───────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let controller_handle = tokio::spawn(async move {
        controller.run(shutdown_rx).await;
    });

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal, stopping");
    }
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    let _ = controller_handle.await;

    info!("Surge daemon stopped");
    Ok(())
}
