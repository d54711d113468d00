mod freezer;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::Level;

use vmsnap_blob::GuestDiskSnapshotWorker;
use vmsnap_core::{Freezer, NoopFreezer, SnapshotMode, SnapshotRequest};
use vmsnap_engine::{
    CoordinatorReport, DispatcherConfig, FileStrategyStore, SnapshotCoordinator, SnapshotDispatcher,
    StrategySelector,
};
use vmsnap_host::HostSnapshotClient;
use vmsnap_settings::{load_settings, load_settings_from_path, LogFormat, LoggingSettings, VmSnapSettings};
use vmsnap_telemetry::{init_telemetry, RunTelemetry, TelemetryConfig};

use crate::freezer::FsFreezeFreezer;

#[derive(Debug, Parser)]
#[command(name = "vmsnap", version, about = "Crash-consistent snapshots of every disk attached to a VM")]
struct Cli {
    /// Settings file. Defaults to ~/.vmsnap/settings.json.
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Snapshot every disk named in a request file and print the report.
    Snapshot {
        /// JSON snapshot request.
        #[arg(long)]
        request: PathBuf,
        /// Mount point to freeze. Repeat for each filesystem.
        #[arg(long = "mount")]
        mounts: Vec<PathBuf>,
        /// Override the configured snapshot mode.
        #[arg(long)]
        mode: Option<SnapshotMode>,
        /// Take the snapshots without freezing.
        #[arg(long)]
        no_freeze: bool,
    },
    /// Show the persisted strategy flag, or reset it.
    Strategy {
        #[arg(long)]
        reset: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let mut settings = match &cli.settings {
        Some(path) => load_settings_from_path(path),
        None => load_settings(),
    }
    .context("failed to load settings")?;
    init_telemetry(&telemetry_config(&settings.logging))?;

    match cli.command {
        Command::Snapshot {
            request,
            mounts,
            mode,
            no_freeze,
        } => {
            if let Some(mode) = mode {
                settings.snapshot_mode = mode;
            }
            if no_freeze {
                settings.freeze_enabled = false;
            }
            let request = load_request(&request)?;
            let report = run_snapshot(&settings, &request, mounts).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(if report.status.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Strategy { reset } => {
            let store = Arc::new(FileStrategyStore::new(settings.strategy_store_path()));
            let selector = StrategySelector::new(store, settings.guest.sequential_threshold);
            if reset {
                selector.reset()?;
                tracing::info!(path = %settings.strategy_store_path().display(), "strategy flag reset");
            }
            println!("{}", selector.current_flag()?.unwrap_or_default());
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run_snapshot(
    settings: &VmSnapSettings,
    request: &SnapshotRequest,
    mounts: Vec<PathBuf>,
) -> anyhow::Result<CoordinatorReport> {
    let telemetry = RunTelemetry::new();
    let worker = GuestDiskSnapshotWorker::with_timeout(settings.guest.blob_request_timeout())
        .context("failed to build storage client")?;
    let store = Arc::new(FileStrategyStore::new(settings.strategy_store_path()));
    let dispatcher = SnapshotDispatcher::new(Arc::new(worker), store, dispatcher_config(settings))
        .with_telemetry(telemetry.clone());
    let host = HostSnapshotClient::new(&settings.host.host_ip, settings.host.request_timeout(), telemetry.clone())
        .context("failed to build host broker client")?;
    let coordinator = SnapshotCoordinator::new(dispatcher, host, settings.snapshot_mode, telemetry)
        .with_settle_delay(settings.guest_to_host_settle());

    let freezer: Box<dyn Freezer> = if settings.freeze_enabled {
        Box::new(FsFreezeFreezer::new(mounts))
    } else {
        Box::new(NoopFreezer)
    };
    Ok(coordinator.run(request, freezer.as_ref()).await)
}

fn dispatcher_config(settings: &VmSnapSettings) -> DispatcherConfig {
    DispatcherConfig {
        sequential_threshold: settings.guest.sequential_threshold,
        join_timeout: settings.guest.join_timeout(),
        slow_start_threshold: settings.guest.slow_start_threshold(),
        freeze_enabled: settings.freeze_enabled,
    }
}

/// Read a request file. A request without a task id gets a fresh one.
fn load_request(path: &Path) -> anyhow::Result<SnapshotRequest> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read request {}", path.display()))?;
    let mut request: SnapshotRequest = serde_json::from_str(&content)
        .with_context(|| format!("invalid request {}", path.display()))?;
    if request.task_id.is_empty() {
        request.task_id = uuid::Uuid::now_v7().to_string();
    }
    Ok(request)
}

fn telemetry_config(logging: &LoggingSettings) -> TelemetryConfig {
    TelemetryConfig {
        log_level: Level::from_str(&logging.level).unwrap_or(Level::INFO),
        module_levels: Vec::new(),
        json: logging.format == LogFormat::Json,
    }
}
