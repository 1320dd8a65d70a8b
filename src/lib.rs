//! Zero-downtime restarts for TCP servers.
//!
//! A process serves on a listener it either binds itself or inherits from
//! its parent on descriptor 3. On SIGUSR2 it launches a copy of itself with
//! the listener attached and `--graceful` appended, then drains. On SIGINT or
//! SIGTERM it drains and exits.
//!
//! # Architecture Overview
//!
//! ```text
//!   argv ──▶ lifecycle::startup ──▶ net::acquire ──▶ Listener
//!                                                      │
//!   signals ──▶ lifecycle::orchestrator ◀──────────────┤
//!                 │        │                           ▼
//!                 │        └──▶ lifecycle::respawn   Server::serve
//!                 ▼                (fd 3 + marker)   (http::HttpServer)
//!           lifecycle::shutdown
//!           (drain, deadline, terminate)
//! ```

#[cfg(not(unix))]
compile_error!("zerodown relies on Unix descriptor inheritance and signals");

pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;

use axum::Router;

pub use config::Config;
pub use error::{Error, Result};
pub use http::HttpServer;
pub use lifecycle::{Invocation, LifecycleState, Orchestrator, Server, StartupMode};

/// Serve `server` on `address` (or the inherited listener) until a stop
/// signal, handing off to a new copy of this process on SIGUSR2.
pub async fn run<S: Server>(server: S, address: &str) -> Result<()> {
    Orchestrator::new(Invocation::from_env())
        .bind_address(address)
        .run(server)
        .await
}

/// [`run`] for an Axum router with default server settings.
pub async fn listen_and_serve(address: &str, router: Router) -> Result<()> {
    let server = HttpServer::new(&config::ServerConfig::default(), router);
    run(server, address).await
}
