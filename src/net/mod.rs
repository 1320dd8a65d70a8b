//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Startup mode
//!     → listener.rs (bind fresh, or adopt fd 3 when inherited)
//!     → fd.rs (descriptor probing and placement, unix only)
//!     → connection.rs (lifecycle tracking for drain)
//!     → Hand off to the serving layer
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection tracked for graceful shutdown
//! - The same descriptor slot is used for inheritance in and out

pub mod connection;
pub mod fd;
pub mod listener;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
pub use fd::INHERITED_FD;
pub use listener::{acquire, AcquireError, Listener};
