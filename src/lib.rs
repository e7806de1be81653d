//! Notes server lifecycle core.
//!
//! Plain and TLS listeners with automatic certificates, a daily maintenance
//! scheduler, a per-request access log and signal-driven graceful shutdown,
//! around an [`Application`] that supplies the request handler.

// Core subsystems
pub mod app;
pub mod config;
pub mod http;
pub mod net;

// Certificates and background work
pub mod acme;
pub mod scheduler;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use app::{Application, StatusApp};
pub use config::ServiceConfig;
pub use lifecycle::{LifecycleError, LifecycleOrchestrator, LifecycleState, Shutdown};
