//! Handler binary entry point
//!
//! A worker process launched by the coordinator: binds its listen endpoint,
//! answers dispatched request/reply calls, and exits gracefully when the
//! supervisor signals it to stop.

use clap::Parser;
use std::net::SocketAddr;
use tokio::signal;

use shared::{logging, ProcessId};

mod server;

use server::HandlerServer;

/// Worker process answering dispatched method calls over request/reply RPC
#[derive(Parser)]
#[command(name = "handler")]
#[command(about = "Worker process answering dispatched method calls")]
struct Args {
    /// Logical handler id assigned by the coordinator
    #[arg(long)]
    id: String,

    /// Listen endpoint for request/reply calls
    #[arg(long, default_value = "127.0.0.1:7000")]
    listen: SocketAddr,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    ProcessId::init_handler(args.id.clone());
    shared::logging::init_tracing_with_level(Some(&args.log_level));
    logging::log_startup(
        ProcessId::current(),
        &format!("handler {} on {}", args.id, args.listen),
    );

    let server = HandlerServer::new(args.id);
    tokio::select! {
        result = server.run(args.listen) => {
            result?;
        }
        _ = shutdown_signal() => {
            logging::log_shutdown(ProcessId::current(), "termination signal received");
        }
    }

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
