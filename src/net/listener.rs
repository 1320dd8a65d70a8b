//! Listener acquisition with backpressure.
//!
//! # Responsibilities
//! - Bind a fresh listener, or adopt the one inherited on [`INHERITED_FD`]
//! - Accept incoming TCP connections
//! - Enforce max_connections limit via semaphore
//!
//! # Design Decisions
//! - Acquisition never retries; any failure is fatal to the run
//! - The inherited slot is adopted at most once per process

use std::io;
use std::net::SocketAddr;
use std::os::unix::io::{AsFd, BorrowedFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

use crate::lifecycle::startup::StartupMode;
use crate::net::fd::{self, Probe, INHERITED_FD};

/// Set once the inherited slot has been turned into a listener.
static INHERITED_ADOPTED: AtomicBool = AtomicBool::new(false);

/// Error type for listener acquisition.
#[derive(Debug, Error)]
pub enum AcquireError {
    /// Failed to bind to address.
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    /// Nothing is open at the inherited slot.
    #[error("inherited descriptor {0} is not open")]
    NotOpen(RawFd),

    /// The inherited slot holds something other than a socket.
    #[error("inherited descriptor {0} is not a socket")]
    NotSocket(RawFd),

    /// The inherited slot holds a socket that is not a listening stream socket.
    #[error("inherited descriptor {0} is not a listening stream socket")]
    NotListening(RawFd),

    /// The inherited slot was already adopted by an earlier acquisition.
    #[error("inherited descriptor {0} was already adopted")]
    AlreadyAdopted(RawFd),

    /// The descriptor checked out but could not be turned into a listener.
    #[error("failed to adopt inherited descriptor {fd}: {source}")]
    Adopt {
        fd: RawFd,
        #[source]
        source: io::Error,
    },
}

/// Obtain the listening socket for this run.
///
/// `Fresh` binds `address`. `Inherited` ignores `address` and reconstructs
/// the listener the parent placed at [`INHERITED_FD`].
pub async fn acquire(mode: StartupMode, address: &str) -> Result<Listener, AcquireError> {
    let listener = match mode {
        StartupMode::Fresh => Listener::bind(address).await?,
        StartupMode::Inherited => Listener::inherit()?,
    };

    if let Ok(local_addr) = listener.local_addr() {
        tracing::info!(
            address = %local_addr,
            mode = %mode,
            "Listener acquired"
        );
    }
    Ok(listener)
}

/// A bounded TCP listener that limits concurrent connections.
///
/// Uses a semaphore to enforce `max_connections`. When the limit is reached,
/// new connections will wait until a slot becomes available.
#[derive(Debug)]
pub struct Listener {
    /// The underlying TCP listener.
    inner: TcpListener,
    /// Semaphore to limit concurrent connections.
    connection_limit: Arc<Semaphore>,
    /// Configured maximum connections.
    max_connections: usize,
}

impl Listener {
    /// Bind a new listener to `address`.
    pub async fn bind(address: &str) -> Result<Self, AcquireError> {
        let inner = TcpListener::bind(address)
            .await
            .map_err(|source| AcquireError::Bind {
                address: address.to_string(),
                source,
            })?;
        Ok(Self::from_tokio(inner))
    }

    /// Reconstruct the listener handed down on [`INHERITED_FD`].
    pub fn inherit() -> Result<Self, AcquireError> {
        let fd = INHERITED_FD;
        match fd::probe(fd).map_err(|source| AcquireError::Adopt { fd, source })? {
            Probe::Closed => return Err(AcquireError::NotOpen(fd)),
            Probe::NotSocket => return Err(AcquireError::NotSocket(fd)),
            Probe::NotListening => return Err(AcquireError::NotListening(fd)),
            Probe::Listening => {}
        }

        if INHERITED_ADOPTED.swap(true, Ordering::SeqCst) {
            return Err(AcquireError::AlreadyAdopted(fd));
        }

        // SAFETY: the slot is reserved for the handoff and the flag above
        // guarantees it is adopted once.
        let std_listener = unsafe { fd::adopt_listener(fd) }
            .map_err(|source| AcquireError::Adopt { fd, source })?;
        let inner =
            TcpListener::from_std(std_listener).map_err(|source| AcquireError::Adopt { fd, source })?;
        Ok(Self::from_tokio(inner))
    }

    /// Wrap an already bound tokio listener.
    pub fn from_tokio(inner: TcpListener) -> Self {
        Self {
            inner,
            connection_limit: Arc::new(Semaphore::new(Semaphore::MAX_PERMITS)),
            max_connections: Semaphore::MAX_PERMITS,
        }
    }

    /// Cap the number of connections held open at once.
    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        let max_connections = max_connections.clamp(1, Semaphore::MAX_PERMITS);
        self.connection_limit = Arc::new(Semaphore::new(max_connections));
        self.max_connections = max_connections;
        self
    }

    /// Accept a new connection, respecting the connection limit.
    ///
    /// This will wait if the connection limit has been reached.
    /// Returns the stream and a permit that must be held for the connection's lifetime.
    pub async fn accept(&self) -> io::Result<(TcpStream, SocketAddr, ConnectionPermit)> {
        // Acquire permit first (backpressure)
        let permit = self
            .connection_limit
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| io::Error::other("connection limit closed"))?;

        let (stream, addr) = self.inner.accept().await?;

        tracing::debug!(
            peer_addr = %addr,
            available_permits = self.connection_limit.available_permits(),
            "Connection accepted"
        );

        Ok((stream, addr, ConnectionPermit { _permit: permit }))
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    /// Get current available connection slots.
    pub fn available_permits(&self) -> usize {
        self.connection_limit.available_permits()
    }

    /// Get configured maximum connections.
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

impl AsFd for Listener {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.inner.as_fd()
    }
}

/// A permit representing a connection slot.
///
/// When dropped, the connection slot is released back to the pool.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
}
