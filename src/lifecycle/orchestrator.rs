//! The control loop of a graceful run.
//!
//! # State Machine
//! ```text
//! Running ──serve error──────────────────────────────▶ Terminated (that error)
//! Running ──SIGINT/SIGTERM──▶ Stopping(Terminate) ──▶ Terminated (drain result)
//! Running ──SIGUSR2─────────▶ Stopping(Reload) ─────▶ Terminated (respawn or drain result)
//! Running ──other signal────▶ Running
//! ```
//!
//! # Design Decisions
//! - One event per iteration, consumed on this task only
//! - Terminate unsubscribes before draining; reload keeps the subscription but
//!   never reads it again, so signals arriving during a handoff are dropped
//! - A failed respawn latches and the drain is skipped

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::lifecycle::server::{ServeError, Server};
use crate::lifecycle::session::Session;
use crate::lifecycle::shutdown;
use crate::lifecycle::signals::{Action, Signals};
use crate::lifecycle::startup::Invocation;
use crate::net;
use crate::observability::metrics;

/// Why a run is stopping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Terminate,
    Reload,
}

/// Externally visible phase of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Listener not acquired yet.
    Starting,
    Running,
    Stopping(StopReason),
    Terminated,
}

/// Runs a server until a signal or a serve failure ends it.
pub struct Orchestrator {
    invocation: Invocation,
    address: String,
    max_connections: Option<usize>,
    drain_timeout: Option<Duration>,
    state: watch::Sender<LifecycleState>,
}

impl Orchestrator {
    pub fn new(invocation: Invocation) -> Self {
        let (state, _) = watch::channel(LifecycleState::Starting);
        Self {
            invocation,
            address: String::from("0.0.0.0:8080"),
            max_connections: None,
            drain_timeout: None,
            state,
        }
    }

    /// Address to bind on a fresh start. Ignored when inheriting.
    pub fn bind_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    pub fn max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = Some(max_connections);
        self
    }

    /// Replace the drain deadline derived from the server's timeouts.
    pub fn drain_timeout(mut self, drain_timeout: Option<Duration>) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    /// Watch the run's phase.
    pub fn state(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Run `server` against the process's own signals.
    pub async fn run<S: Server>(self, server: S) -> Result<()> {
        let signals = Signals::subscribe().map_err(Error::Signal)?;
        self.run_with_signals(server, signals).await
    }

    /// Run `server`, taking lifecycle signals from `signals`.
    pub async fn run_with_signals<S: Server>(self, server: S, mut signals: Signals) -> Result<()> {
        let Orchestrator {
            invocation,
            address,
            max_connections,
            drain_timeout,
            state,
        } = self;

        let result = drive(
            server,
            &mut signals,
            &invocation,
            &address,
            max_connections,
            drain_timeout,
            &state,
        )
        .await;

        state.send_replace(LifecycleState::Terminated);
        result
    }
}

async fn drive<S: Server>(
    server: S,
    signals: &mut Signals,
    invocation: &Invocation,
    address: &str,
    max_connections: Option<usize>,
    drain_timeout: Option<Duration>,
    state: &watch::Sender<LifecycleState>,
) -> Result<()> {
    let mut listener = net::acquire(invocation.mode(), address).await?;
    if let Some(max) = max_connections {
        listener = listener.with_max_connections(max);
    }
    let listener = Arc::new(listener);

    let deadline = drain_timeout.unwrap_or_else(|| shutdown::drain_deadline(server.timeouts()));
    let mut serving = tokio::spawn(server.serve(Arc::clone(&listener)));
    let mut session = Session::new(server, listener);
    let mut subscribed = true;

    state.send_replace(LifecycleState::Running);
    tracing::info!(
        pid = std::process::id(),
        mode = %invocation.mode(),
        deadline_ms = deadline.as_millis() as u64,
        "Serving"
    );

    loop {
        tokio::select! {
            joined = &mut serving => {
                return match joined {
                    Ok(Ok(())) => {
                        tracing::info!("Serve loop finished");
                        Ok(())
                    }
                    Ok(Err(e)) => {
                        tracing::error!(error = %e, "Serve loop failed");
                        Err(e.into())
                    }
                    Err(e) => Err(ServeError::Aborted(e.to_string()).into()),
                };
            }
            received = signals.recv(), if subscribed => {
                let Some(signal) = received else {
                    tracing::debug!("Signal source closed");
                    subscribed = false;
                    continue;
                };
                metrics::record_signal(signal.name());

                match signal.action() {
                    Action::Stop => {
                        tracing::info!(signal = %signal, "Graceful shutdown requested");
                        signals.unsubscribe();
                        state.send_replace(LifecycleState::Stopping(StopReason::Terminate));
                        session.stop(deadline).await;
                        break;
                    }
                    Action::Reload => {
                        tracing::info!(signal = %signal, "Handoff requested");
                        state.send_replace(LifecycleState::Stopping(StopReason::Reload));
                        session.reload(invocation);
                        session.stop(deadline).await;
                        break;
                    }
                    Action::Ignore => {
                        tracing::debug!(signal = %signal, "Ignoring signal");
                    }
                }
            }
        }
    }

    session.finish()
}
