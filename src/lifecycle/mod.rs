//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     argv → StartupMode (fresh | inherited) → net::acquire
//!
//! Control loop (orchestrator.rs):
//!     spawn serve loop → wait on signals.rs or serve failure
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → shutdown.rs (drain within deadline)
//!     SIGUSR2        → respawn.rs (child inherits fd 3) → shutdown.rs
//!
//! Session (session.rs):
//!     listener + server + first error; a latched error skips the drain
//! ```
//!
//! # Design Decisions
//! - Spawn-then-drain: the replacement is not health-checked
//! - Shutdown has a deadline: forced close after it
//! - No retries anywhere; recovery is up to the operator

pub mod orchestrator;
pub mod respawn;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod signals;
pub mod startup;

pub use orchestrator::{LifecycleState, Orchestrator, StopReason};
pub use respawn::{respawn, Respawned, SpawnError};
pub use server::{ServeError, Server, Timeouts};
pub use session::Session;
pub use shutdown::{drain_deadline, ShutdownError, DEFAULT_DRAIN_TIMEOUT};
pub use signals::{Signal, SignalSender, Signals};
pub use startup::{append_restart_marker, Invocation, StartupMode, RESTART_MARKER};
