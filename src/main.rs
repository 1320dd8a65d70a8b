//! zerodown: an HTTP server that restarts without dropping connections.
//!
//! ```text
//! zerodown [CONFIG] [--bind ADDR] [--drain-timeout SECS] [--debug]
//!
//! kill -USR2 <pid>   hand the listener to a fresh copy, then drain
//! kill -TERM <pid>   drain and exit
//! ```
//!
//! The replacement is started with this process's own arguments, so it
//! re-reads the config file and picks up a swapped binary at the same path.

use std::path::PathBuf;

use clap::Parser;

use zerodown::config::Config;
use zerodown::http::handlers::{self, AppState};
use zerodown::lifecycle::{Invocation, Orchestrator};
use zerodown::net::ConnectionTracker;
use zerodown::observability::{init_logging, init_metrics};
use zerodown::HttpServer;

#[derive(Parser, Debug)]
#[command(name = "zerodown", version, about = "HTTP server with zero-downtime restarts")]
struct Args {
    /// Path to a TOML config file
    config: Option<PathBuf>,

    /// Bind address on a fresh start, overriding the config
    #[arg(long)]
    bind: Option<String>,

    /// Drain deadline in seconds, overriding the config
    #[arg(long, value_name = "SECS")]
    drain_timeout: Option<u64>,

    /// Log at debug level
    #[arg(long)]
    debug: bool,

    /// Set on a replacement process; the listener is on descriptor 3
    #[arg(long, hide = true)]
    graceful: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.server.bind_address = bind;
    }
    if let Some(secs) = args.drain_timeout {
        config.shutdown.drain_timeout_secs = Some(secs);
    }
    if args.debug {
        config.observability.log_level = "debug".to_string();
    }

    init_logging(&config.observability)?;

    let invocation = Invocation::from_env();
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = std::process::id(),
        mode = %invocation.mode(),
        graceful = args.graceful,
        "zerodown starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = init_metrics(addr) {
                    tracing::warn!(error = %e, "Metrics endpoint unavailable");
                }
            }
            Err(e) => {
                tracing::warn!(
                    metrics_address = %config.observability.metrics_address,
                    error = %e,
                    "Failed to parse metrics address"
                );
            }
        }
    }

    let orchestrator = Orchestrator::new(invocation.clone())
        .bind_address(config.server.bind_address.clone())
        .max_connections(config.server.max_connections)
        .drain_timeout(config.shutdown.drain_timeout());

    let connections = ConnectionTracker::new();
    let router = handlers::router(AppState {
        mode: invocation.mode(),
        lifecycle: orchestrator.state(),
        connections: connections.clone(),
    });
    let server = HttpServer::with_connections(&config.server, router, connections);

    if let Err(e) = orchestrator.run(server).await {
        tracing::error!(error = %e, "Run ended with an error");
        return Err(e.into());
    }

    tracing::info!(pid = std::process::id(), "Shutdown complete");
    Ok(())
}
