//! Main entry point for the coordinator binary
//!
//! Loads the fleet file, starts supervision with real service
//! implementations, and keeps the health facade sweeping until a
//! termination signal drives a graceful stop of all managed workers.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;

use coordinator::{
    CoordinatorResult, FleetConfig, HandlerRegistry, HealthMonitor, ProcessSupervisor, StateStore,
    Supervisor,
};
use shared::{logging, process_info, ProcessId};

/// Coordinator supervising handler processes for the job-execution fabric
#[derive(Parser)]
#[command(name = "coordinator")]
#[command(about = "Supervises handler processes and maintains resilient RPC sessions to them")]
pub struct Args {
    /// Fleet configuration file (JSON)
    #[arg(long, default_value = "fleet.json")]
    pub config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Override the durable process record file from the fleet file
    #[arg(long)]
    pub state_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> CoordinatorResult<()> {
    let args = Args::parse();

    // Initialize process ID singleton for the coordinator
    ProcessId::init_coordinator();
    shared::logging::init_tracing_with_level(Some(&args.log_level));
    logging::log_startup(ProcessId::current(), "coordinator service");

    let mut fleet = FleetConfig::load(&args.config)?;
    if let Some(path) = args.state_file {
        fleet.settings.state_file = path;
    }
    process_info!(
        ProcessId::current(),
        "Supervising {} handler(s), records in {}",
        fleet.handlers.len(),
        fleet.settings.state_file.display()
    );

    // Wire up services
    let registry = Arc::new(HandlerRegistry::new(fleet.settings.client_settings()));
    let store = StateStore::new(fleet.settings.state_file.clone());
    let supervisor = Arc::new(
        ProcessSupervisor::new(
            fleet.handlers,
            store,
            Arc::clone(&registry),
            fleet.settings.clone(),
        )
        .await?,
    );

    supervisor.start().await?;
    let crash_monitor =
        Arc::clone(&supervisor).spawn_crash_monitor(fleet.settings.health_interval());

    // Graceful-stop request: a termination signal drives stop() on all
    // children so killing the coordinator does not orphan workers
    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    tokio::spawn(async move {
        shutdown_signal().await;
        logging::log_shutdown(ProcessId::current(), "termination signal received");
        let _ = shutdown_tx.send(()).await;
    });

    let monitor = HealthMonitor::new(
        Arc::clone(&supervisor),
        Arc::clone(&registry),
        fleet.settings.health_interval(),
        fleet.settings.health_check_timeout(),
    );
    monitor.run(shutdown_rx).await;

    crash_monitor.abort();
    supervisor.stop(fleet.settings.stop_timeout()).await?;
    registry.shutdown().await;

    logging::log_success(ProcessId::current(), "Coordinator stopped gracefully");
    Ok(())
}

/// Resolves when the process receives ctrl-c or, on unix, SIGTERM
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal as unix_signal, SignalKind};
        let mut term = match unix_signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(_) => {
                let _ = signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
    }
}
