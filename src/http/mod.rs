//! HTTP handling subsystem.
//!
//! # Data Flow
//! ```text
//! Plain listener:
//!     → challenge.rs (ACME HTTP-01 tokens, when certificates are managed)
//!     → redirect.rs (permanent redirect to HTTPS) or the application
//!
//! Application (both listeners):
//!     → server.rs (request id, tracing)
//!     → access_log.rs (one record per completed request)
//!     → application router
//! ```

pub mod access_log;
pub mod challenge;
pub mod redirect;
pub mod server;

pub use access_log::{client_ip, with_access_log, UserId};
pub use challenge::with_challenges;
pub use redirect::redirect_router;
pub use server::build_handler;
