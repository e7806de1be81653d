//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured diagnostic events via tracing)
//!     → metrics.rs (counters)
//!
//! Request handlers produce:
//!     → access_log.rs (one CSV record per completed request, daily file)
//! ```
//!
//! # Design Decisions
//! - Diagnostics and the access log are separate channels; access log
//!   failures are reported on the diagnostic channel
//! - The access log sink is owned by the orchestrator and passed by handle

pub mod access_log;
pub mod logging;
pub mod metrics;

pub use access_log::{AccessLogRecord, AccessLogSink};
