//! Background maintenance scheduling.
//!
//! # Data Flow
//! ```text
//! DailyScheduler (own task)
//!     Waiting: plan next 01:00 UTC → sleep (or exit on shutdown)
//!     Running: spawn Maintenance::run → await → log outcome
//!     → back to Waiting
//! ```
//!
//! # Design Decisions
//! - Exactly one run in flight; the next wait is planned after a run returns
//! - Time comes from a `Clock` so the schedule can be exercised on paused time

pub mod clock;
pub mod daily;

pub use clock::{Clock, SystemClock};
pub use daily::{next_run_after, plan_next, DailyScheduler, Maintenance, NextRun};
