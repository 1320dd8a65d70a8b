//! Error types for a graceful run.

use std::io;
use thiserror::Error;

use crate::lifecycle::respawn::SpawnError;
use crate::lifecycle::server::ServeError;
use crate::lifecycle::shutdown::ShutdownError;
use crate::net::listener::AcquireError;

/// Result type alias for lifecycle operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Outcome of a run that did not end cleanly.
#[derive(Error, Debug)]
pub enum Error {
    /// No listener could be bound or inherited; nothing was served.
    #[error("listener acquisition failed: {0}")]
    Acquire(#[from] AcquireError),

    /// The replacement process could not be launched; this process kept serving.
    #[error("respawn failed: {0}")]
    Spawn(#[from] SpawnError),

    /// Draining failed or ran past its deadline.
    #[error("shutdown failed: {0}")]
    Shutdown(#[from] ShutdownError),

    /// The serve loop stopped on its own.
    #[error("serve loop failed: {0}")]
    Serve(#[from] ServeError),

    /// Signal handlers could not be installed.
    #[error("signal subscription failed: {0}")]
    Signal(#[source] io::Error),
}
