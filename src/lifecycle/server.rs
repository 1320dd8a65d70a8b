//! The serving capability driven by the lifecycle.
//!
//! The lifecycle never looks at what is served over the socket. It needs a
//! server that can run an accept loop, drain, and be cut off.

use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::net::Listener;

/// Read and write timeouts configured on a server. Zero means unset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timeouts {
    pub read: Duration,
    pub write: Duration,
}

impl Timeouts {
    pub fn new(read: Duration, write: Duration) -> Self {
        Self { read, write }
    }

    pub fn is_unset(&self) -> bool {
        self.read.is_zero() && self.write.is_zero()
    }
}

/// Why a serve loop stopped on its own.
#[derive(Debug, Error)]
pub enum ServeError {
    /// Accepting failed with an error that is not worth retrying.
    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),

    /// The serving task panicked or was cancelled.
    #[error("serve task aborted: {0}")]
    Aborted(String),
}

/// A server the lifecycle can start, drain, and terminate.
pub trait Server: Send + Sync + 'static {
    /// Timeouts the drain deadline is derived from.
    fn timeouts(&self) -> Timeouts;

    /// Run the accept loop until drained or terminated.
    ///
    /// Returns `Ok(())` when stopped on request, `Err` when the loop gave up
    /// by itself. The listener must be released once accepting stops.
    fn serve(
        &self,
        listener: Arc<Listener>,
    ) -> impl Future<Output = Result<(), ServeError>> + Send + 'static;

    /// Stop accepting, let in-flight requests finish, then resolve.
    fn drain(&self) -> impl Future<Output = io::Result<()>> + Send;

    /// Drop every remaining connection now.
    fn terminate(&self);
}
