//! OS signal handling.
//!
//! # Responsibilities
//! - Register handlers for every catchable signal that kills by default
//! - Translate signals to internal events
//! - Feed them to the control loop through a single queue
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - SIGINT/SIGTERM stop gracefully, SIGUSR2 hands off then stops
//! - Every other such signal (SIGHUP, SIGUSR1, SIGQUIT, SIGALRM, ...) is caught
//!   so it cannot kill the process, then ignored
//! - Handlers stay installed after unsubscribing: a late signal is swallowed,
//!   not fatal

use std::fmt;
use std::io;

use tokio::signal::unix::{signal as unix_signal, SignalKind};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A signal the lifecycle listens for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Interrupt,
    Terminate,
    Reload,
    Hangup,
    User1,
    /// Any other default-fatal signal, by name.
    Absorbed(&'static str),
}

/// Default-fatal signals with no lifecycle meaning. SIGKILL and SIGSTOP
/// cannot be caught; SIGILL, SIGFPE and SIGSEGV are left to the runtime.
const ABSORBED: &[(libc::c_int, &str)] = &[
    (libc::SIGQUIT, "SIGQUIT"),
    (libc::SIGTRAP, "SIGTRAP"),
    (libc::SIGALRM, "SIGALRM"),
    (libc::SIGVTALRM, "SIGVTALRM"),
    (libc::SIGPROF, "SIGPROF"),
    (libc::SIGXCPU, "SIGXCPU"),
    (libc::SIGXFSZ, "SIGXFSZ"),
    (libc::SIGIO, "SIGIO"),
    (libc::SIGSYS, "SIGSYS"),
];

/// What the control loop does with a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Stop,
    Reload,
    Ignore,
}

impl Signal {
    pub fn action(&self) -> Action {
        match self {
            Signal::Interrupt | Signal::Terminate => Action::Stop,
            Signal::Reload => Action::Reload,
            Signal::Hangup | Signal::User1 | Signal::Absorbed(_) => Action::Ignore,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Signal::Interrupt => "SIGINT",
            Signal::Terminate => "SIGTERM",
            Signal::Reload => "SIGUSR2",
            Signal::Hangup => "SIGHUP",
            Signal::User1 => "SIGUSR1",
            Signal::Absorbed(name) => *name,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Injects signals into a [`Signals`] queue without going through the OS.
#[derive(Debug, Clone)]
pub struct SignalSender {
    tx: mpsc::UnboundedSender<Signal>,
}

impl SignalSender {
    /// Queue a signal. Returns false once the receiving side has unsubscribed.
    pub fn send(&self, signal: Signal) -> bool {
        self.tx.send(signal).is_ok()
    }
}

/// Signal subscription consumed by the control loop.
#[derive(Debug)]
pub struct Signals {
    rx: mpsc::UnboundedReceiver<Signal>,
    forwarders: Vec<JoinHandle<()>>,
}

impl Signals {
    /// Subscribe to the process's signals.
    pub fn subscribe() -> io::Result<Self> {
        let handled = [
            (SignalKind::interrupt(), Signal::Interrupt),
            (SignalKind::terminate(), Signal::Terminate),
            (SignalKind::user_defined2(), Signal::Reload),
            (SignalKind::hangup(), Signal::Hangup),
            (SignalKind::user_defined1(), Signal::User1),
        ]
        .into_iter()
        .chain(
            ABSORBED
                .iter()
                .map(|&(raw, name)| (SignalKind::from_raw(raw), Signal::Absorbed(name))),
        );

        let (sender, mut signals) = Self::channel();
        for (kind, signal) in handled {
            // On error `signals` drops here and aborts the forwarders so far.
            signals.forwarders.push(forward(kind, signal, sender.clone())?);
        }

        tracing::debug!(count = signals.forwarders.len(), "Signal handlers installed");
        Ok(signals)
    }

    /// A queue fed only by the returned sender.
    pub fn channel() -> (SignalSender, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            SignalSender { tx },
            Self {
                rx,
                forwarders: Vec::new(),
            },
        )
    }

    /// Next signal, or `None` once every producer is gone.
    pub async fn recv(&mut self) -> Option<Signal> {
        self.rx.recv().await
    }

    /// Stop receiving. Signals delivered afterwards are dropped.
    pub fn unsubscribe(&mut self) {
        for forwarder in self.forwarders.drain(..) {
            forwarder.abort();
        }
        self.rx.close();
    }
}

/// Feed every delivery of `kind` into the queue as `signal`.
fn forward(kind: SignalKind, signal: Signal, sender: SignalSender) -> io::Result<JoinHandle<()>> {
    let mut stream = unix_signal(kind)?;
    Ok(tokio::spawn(async move {
        while stream.recv().await.is_some() {
            if !sender.send(signal) {
                break;
            }
        }
    }))
}

impl Drop for Signals {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
