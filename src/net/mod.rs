//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (plain or TLS listener task, drain on shutdown)
//!     → acceptor.rs (TLS only: SNI → certificate → handshake)
//!     → tls.rs (PEM material → rustls ServerConfig)
//!     → Hand off to HTTP layer
//!
//! Listener States:
//!     Binding → Accepting → Draining → Stopped
//! ```
//!
//! # Design Decisions
//! - Each listener is an independent task with its own drain handle
//! - A failed handshake closes that connection only
//! - Stopping because shutdown was requested is not an error

pub mod acceptor;
pub mod listener;
pub mod tls;

pub use listener::{ListenerError, ListenerHandle, ListenerKind, ListenerReport, ListenerSet};
