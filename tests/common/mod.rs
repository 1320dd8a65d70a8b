//! Shared utilities for lifecycle integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use zerodown::lifecycle::{ServeError, Server, Timeouts};
use zerodown::net::Listener;

/// A server that accepts and immediately drops connections, recording what
/// the lifecycle asks of it.
#[derive(Clone, Default)]
pub struct MockServer {
    inner: Arc<MockInner>,
}

#[derive(Default)]
struct MockInner {
    timeouts: Timeouts,
    hang_on_drain: bool,
    fail_serve: bool,
    drains: AtomicUsize,
    terminates: AtomicUsize,
    address: Mutex<Option<SocketAddr>>,
    serving: Notify,
    stop: CancellationToken,
}

impl MockServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeouts(read: Duration, write: Duration) -> Self {
        Self::build(Timeouts::new(read, write), false, false)
    }

    /// Drain never completes; only the deadline ends it.
    pub fn hanging(timeouts: Timeouts) -> Self {
        Self::build(timeouts, true, false)
    }

    /// Serve fails as soon as it starts.
    pub fn failing() -> Self {
        Self::build(Timeouts::default(), false, true)
    }

    fn build(timeouts: Timeouts, hang_on_drain: bool, fail_serve: bool) -> Self {
        Self {
            inner: Arc::new(MockInner {
                timeouts,
                hang_on_drain,
                fail_serve,
                ..MockInner::default()
            }),
        }
    }

    pub fn drains(&self) -> usize {
        self.inner.drains.load(Ordering::SeqCst)
    }

    pub fn terminates(&self) -> usize {
        self.inner.terminates.load(Ordering::SeqCst)
    }

    /// Wait until serve has been entered, returning the listener address.
    pub async fn serving(&self) -> SocketAddr {
        self.inner.serving.notified().await;
        self.address().expect("serve records the address")
    }

    pub fn address(&self) -> Option<SocketAddr> {
        *self.inner.address.lock().unwrap()
    }
}

impl Server for MockServer {
    fn timeouts(&self) -> Timeouts {
        self.inner.timeouts
    }

    fn serve(
        &self,
        listener: Arc<Listener>,
    ) -> impl Future<Output = Result<(), ServeError>> + Send + 'static {
        let inner = Arc::clone(&self.inner);
        async move {
            *inner.address.lock().unwrap() = listener.local_addr().ok();
            // notify_one stores a permit, so a late `serving()` still wakes.
            inner.serving.notify_one();

            if inner.fail_serve {
                return Err(ServeError::Accept(io::Error::other("injected accept failure")));
            }

            loop {
                tokio::select! {
                    _ = inner.stop.cancelled() => return Ok(()),
                    accepted = listener.accept() => drop(accepted),
                }
            }
        }
    }

    fn drain(&self) -> impl Future<Output = io::Result<()>> + Send {
        let inner = Arc::clone(&self.inner);
        async move {
            inner.drains.fetch_add(1, Ordering::SeqCst);
            if inner.hang_on_drain {
                std::future::pending::<()>().await;
            }
            inner.stop.cancel();
            Ok(())
        }
    }

    fn terminate(&self) {
        self.inner.terminates.fetch_add(1, Ordering::SeqCst);
        self.inner.stop.cancel();
    }
}

/// Poll until something accepts TCP connections on `addr`.
pub async fn wait_for_listener(addr: SocketAddr) {
    for _ in 0..100 {
        if TcpStream::connect(addr).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("nothing listening on {addr}");
}

/// Poll until `check` holds.
pub async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}
