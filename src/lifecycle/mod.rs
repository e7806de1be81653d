//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Verify directories → Open access log
//!
//! Orchestration (orchestrator.rs):
//!     Build handler → Certificates (TLS only) → Start listeners
//!     → Start scheduler → Running → wait for signal
//!
//! Shutdown (shutdown.rs, signals.rs):
//!     SIGTERM/SIGINT → Stop scheduler → Drain listeners → Close application
//! ```
//!
//! # Design Decisions
//! - Ordered startup: preconditions first, listeners last
//! - Shutdown has a deadline: connections still open after it are closed
//! - A listener ending on its own also ends the lifecycle, with an error

pub mod orchestrator;
pub mod shutdown;
pub mod signals;
pub mod startup;

pub use orchestrator::{LifecycleError, LifecycleOrchestrator, LifecycleState};
pub use shutdown::{Shutdown, ShutdownListener};
pub use signals::{SignalQueue, TerminationSignal};
pub use startup::{open_access_log, verify_directories, StartupError};
