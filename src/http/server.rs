//! HTTP server driven by the lifecycle.
//!
//! # Responsibilities
//! - Wrap an Axum Router with request ID, tracing and timeout layers
//! - Serve HTTP/1.1 and HTTP/2 on a lifecycle-provided listener
//! - Drain: stop accepting, close the listener, let in-flight requests finish
//! - Terminate: drop whatever is still open
//!
//! # Design Decisions
//! - Read timeout bounds HTTP/1 header reads; write timeout bounds handlers
//! - Transient accept errors (fd exhaustion, aborted handshakes) back off and
//!   retry; anything else ends the serve loop

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::future::Future;
use std::time::Duration;

use axum::{body::Body, extract::Request, Router};
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto::Builder;
use hyper_util::service::TowerToHyperService;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::ServerConfig;
use crate::http::request::RequestIdLayer;
use crate::lifecycle::server::{ServeError, Server, Timeouts};
use crate::net::listener::{ConnectionPermit, Listener};
use crate::net::{ConnectionGuard, ConnectionTracker};

/// How long a drain waits for a new connection to send its first request.
const NEW_CONNECTION_GRACE: Duration = Duration::from_secs(5);

/// HTTP server implementing the lifecycle's [`Server`] capability.
#[derive(Clone)]
pub struct HttpServer {
    inner: Arc<Inner>,
}

struct Inner {
    router: Router,
    builder: Builder<TokioExecutor>,
    timeouts: Timeouts,
    connections: ConnectionTracker,
    started: AtomicBool,
    /// Cancelled to stop the accept loop.
    accepting: CancellationToken,
    /// Cancelled by the accept loop once it has let go of the listener.
    closed: CancellationToken,
    /// Cancelled to ask connections to finish their current request and close.
    draining: CancellationToken,
    /// Cancelled to drop connections immediately.
    killed: CancellationToken,
}

impl HttpServer {
    /// Create a new HTTP server serving `router`.
    pub fn new(config: &ServerConfig, router: Router) -> Self {
        Self::with_connections(config, router, ConnectionTracker::new())
    }

    /// Like [`new`](Self::new), counting connections on a caller-owned tracker.
    pub fn with_connections(
        config: &ServerConfig,
        router: Router,
        connections: ConnectionTracker,
    ) -> Self {
        let timeouts = config.timeouts();

        let mut builder = Builder::new(TokioExecutor::new());
        if !timeouts.read.is_zero() {
            builder
                .http1()
                .timer(TokioTimer::new())
                .header_read_timeout(timeouts.read);
        }

        Self {
            inner: Arc::new(Inner {
                router: Self::build_router(router, timeouts),
                builder,
                timeouts,
                connections,
                started: AtomicBool::new(false),
                accepting: CancellationToken::new(),
                closed: CancellationToken::new(),
                draining: CancellationToken::new(),
                killed: CancellationToken::new(),
            }),
        }
    }

    /// Wrap the caller's routes with the server's middleware layers.
    #[allow(deprecated)]
    fn build_router(router: Router, timeouts: Timeouts) -> Router {
        let router = if timeouts.write.is_zero() {
            router
        } else {
            router.layer(TimeoutLayer::new(timeouts.write))
        };
        router
            .layer(RequestIdLayer)
            .layer(TraceLayer::new_for_http())
    }

    /// Tracker counting this server's open connections.
    pub fn connections(&self) -> &ConnectionTracker {
        &self.inner.connections
    }
}

impl Server for HttpServer {
    fn timeouts(&self) -> Timeouts {
        self.inner.timeouts
    }

    fn serve(
        &self,
        listener: Arc<Listener>,
    ) -> impl Future<Output = Result<(), ServeError>> + Send + 'static {
        let inner = Arc::clone(&self.inner);
        async move {
            inner.started.store(true, Ordering::SeqCst);
            if let Ok(addr) = listener.local_addr() {
                tracing::info!(address = %addr, "HTTP server starting");
            }

            let result = accept_loop(&inner, &listener).await;
            // Last reference in the serving context; the socket closes here
            // unless the lifecycle still holds it.
            drop(listener);
            inner.closed.cancel();

            tracing::info!("HTTP server stopped accepting");
            result
        }
    }

    fn drain(&self) -> impl Future<Output = io::Result<()>> + Send {
        let inner = Arc::clone(&self.inner);
        async move {
            inner.accepting.cancel();
            if inner.started.load(Ordering::SeqCst) {
                inner.closed.cancelled().await;
            }

            tracing::info!(
                active = inner.connections.active_count(),
                "Waiting for connections to drain"
            );
            inner.draining.cancel();
            inner.connections.wait_for_drain().await;
            Ok(())
        }
    }

    fn terminate(&self) {
        tracing::warn!(
            active = self.inner.connections.active_count(),
            "Terminating remaining connections"
        );
        self.inner.accepting.cancel();
        self.inner.killed.cancel();
    }
}

async fn accept_loop(inner: &Arc<Inner>, listener: &Listener) -> Result<(), ServeError> {
    loop {
        let accepted = tokio::select! {
            biased;
            _ = inner.accepting.cancelled() => return Ok(()),
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer, permit)) => {
                let guard = inner.connections.track();
                tokio::spawn(serve_connection(Arc::clone(inner), stream, peer, permit, guard));
            }
            Err(e) if is_transient(&e) => {
                tracing::warn!(error = %e, "Accept error, backing off");
                tokio::select! {
                    _ = inner.accepting.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(Duration::from_millis(100)) => {}
                }
            }
            Err(e) => return Err(ServeError::Accept(e)),
        }
    }
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    ) || matches!(
        err.raw_os_error(),
        Some(libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM)
    )
}

async fn serve_connection(
    inner: Arc<Inner>,
    stream: TcpStream,
    peer: SocketAddr,
    _permit: ConnectionPermit,
    guard: ConnectionGuard,
) {
    // Cancelled once hyper hands the first request to the router.
    let first_request = CancellationToken::new();
    let seen = first_request.clone();
    let service = TowerToHyperService::new(inner.router.clone().map_request(
        move |request: Request<Incoming>| {
            seen.cancel();
            request.map(Body::new)
        },
    ));
    let conn = inner
        .builder
        .serve_connection_with_upgrades(TokioIo::new(stream), service);
    tokio::pin!(conn);

    let result = tokio::select! {
        biased;
        _ = inner.killed.cancelled() => None,
        result = conn.as_mut() => Some(result),
        _ = inner.draining.cancelled() => {
            // hyper closes a connection that has not parsed a request yet as
            // idle, resetting a client whose request is still in the socket.
            let finished = tokio::select! {
                biased;
                _ = inner.killed.cancelled() => Some(None),
                result = conn.as_mut() => Some(Some(result)),
                _ = first_request.cancelled() => None,
                _ = tokio::time::sleep(NEW_CONNECTION_GRACE) => None,
            };
            match finished {
                Some(outcome) => outcome,
                None => {
                    conn.as_mut().graceful_shutdown();
                    tokio::select! {
                        biased;
                        _ = inner.killed.cancelled() => None,
                        result = conn.as_mut() => Some(result),
                    }
                }
            }
        }
    };

    match result {
        None => {
            tracing::debug!(connection_id = %guard.id(), peer = %peer, "Connection cut off");
        }
        Some(Err(e)) => {
            tracing::debug!(connection_id = %guard.id(), peer = %peer, error = %e, "Connection error");
        }
        Some(Ok(())) => {}
    }
}
