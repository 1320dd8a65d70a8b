//! HTTP serving subsystem.
//!
//! # Data Flow
//! ```text
//! Listener (from lifecycle)
//!     → server.rs (accept loop, hyper auto HTTP/1 + HTTP/2, drain/terminate)
//!     → request.rs (request ID)
//!     → caller's Router, or handlers.rs for the bundled binary
//!     → Send to client
//! ```

pub mod handlers;
pub mod request;
pub mod server;

pub use request::{RequestId, RequestIdExt, RequestIdLayer, X_REQUEST_ID};
pub use server::HttpServer;
