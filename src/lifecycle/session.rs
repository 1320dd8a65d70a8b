//! State shared by the lifecycle steps of one run.
//!
//! Only the control loop touches a session, one step at a time.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::lifecycle::respawn::{self, Respawned};
use crate::lifecycle::server::Server;
use crate::lifecycle::shutdown;
use crate::lifecycle::startup::Invocation;
use crate::net::Listener;
use crate::observability::metrics;

/// Listener, server and the first error of a run.
pub struct Session<S> {
    listener: Option<Arc<Listener>>,
    server: S,
    latched: Option<Error>,
}

impl<S: Server> Session<S> {
    pub fn new(server: S, listener: Arc<Listener>) -> Self {
        Self {
            listener: Some(listener),
            server,
            latched: None,
        }
    }

    /// Listener handle, until [`stop`](Self::stop) releases it.
    pub fn listener(&self) -> Option<&Arc<Listener>> {
        self.listener.as_ref()
    }

    pub fn server(&self) -> &S {
        &self.server
    }

    /// The latched error, if any step has failed.
    pub fn latched(&self) -> Option<&Error> {
        self.latched.as_ref()
    }

    /// Record `err` unless an earlier error is already latched.
    pub fn latch(&mut self, err: impl Into<Error>) {
        if self.latched.is_none() {
            self.latched = Some(err.into());
        }
    }

    /// Launch the replacement process, latching a failure.
    pub fn reload(&mut self, invocation: &Invocation) -> Option<Respawned> {
        let Some(listener) = self.listener.as_deref() else {
            tracing::warn!("Reload requested after the listener was released");
            return None;
        };

        match respawn::respawn(listener, invocation) {
            Ok(respawned) => {
                metrics::record_respawn("launched");
                Some(respawned)
            }
            Err(e) => {
                metrics::record_respawn("failed");
                tracing::error!(error = %e, "Respawn failed, keeping this process serving");
                self.latch(e);
                None
            }
        }
    }

    /// Drain the server within `deadline`.
    ///
    /// Skipped entirely when an error is latched: the listener stays open and
    /// the server keeps serving.
    pub async fn stop(&mut self, deadline: Duration) {
        if let Some(err) = &self.latched {
            tracing::warn!(error = %err, "Skipping shutdown after earlier failure");
            return;
        }

        self.listener = None;
        if let Err(e) = shutdown::stop(&self.server, deadline).await {
            self.latch(e);
        }
    }

    /// End the run with the latched error, if any.
    pub fn finish(self) -> Result<()> {
        match self.latched {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
