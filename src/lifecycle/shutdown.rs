//! Deadline-bounded drain.

use std::io;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::lifecycle::server::{Server, Timeouts};
use crate::observability::metrics;

/// Drain window used when a server has neither read nor write timeout.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(20);

/// Errors from stopping a server.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// Connections were still open when the deadline passed; they were cut.
    #[error("drain deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    /// The server failed while draining.
    #[error("drain failed: {0}")]
    Drain(#[source] io::Error),
}

/// Drain window for a server: read + write timeout, or the default when both are unset.
pub fn drain_deadline(timeouts: Timeouts) -> Duration {
    if timeouts.is_unset() {
        DEFAULT_DRAIN_TIMEOUT
    } else {
        timeouts.read + timeouts.write
    }
}

/// Gracefully stop `server`, force-closing what is left after `deadline`.
pub async fn stop<S: Server>(server: &S, deadline: Duration) -> Result<(), ShutdownError> {
    let started = Instant::now();
    tracing::info!(deadline_ms = deadline.as_millis() as u64, "Draining connections");

    match tokio::time::timeout(deadline, server.drain()).await {
        Ok(Ok(())) => {
            metrics::record_drain("clean", started);
            tracing::info!(elapsed_ms = started.elapsed().as_millis() as u64, "Drain complete");
            Ok(())
        }
        Ok(Err(e)) => {
            metrics::record_drain("failed", started);
            tracing::error!(error = %e, "Drain failed");
            Err(ShutdownError::Drain(e))
        }
        Err(_) => {
            server.terminate();
            metrics::record_drain("deadline_exceeded", started);
            tracing::warn!(
                deadline_ms = deadline.as_millis() as u64,
                "Drain deadline exceeded, terminating remaining connections"
            );
            Err(ShutdownError::DeadlineExceeded(deadline))
        }
    }
}
