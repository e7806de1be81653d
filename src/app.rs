//! The application served by the listeners.
//!
//! [`Application`] is what the lifecycle core needs from the rest of the
//! service: a request handler built once at startup, the daily maintenance
//! job, and an orderly close at shutdown. [`StatusApp`] is the built-in
//! implementation the binary serves on its own.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::scheduler::Maintenance;

#[async_trait]
pub trait Application: Send + Sync + 'static {
    /// Build the request handler. Called once, before any listener starts.
    fn request_handler(&self) -> anyhow::Result<Router>;

    /// Job run by the daily scheduler.
    fn maintenance(&self) -> Arc<dyn Maintenance>;

    /// Release resources that need orderly closing. Called once, after every
    /// listener has stopped.
    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Debug)]
struct StatusState {
    started: DateTime<Utc>,
    last_index_build: RwLock<Option<DateTime<Utc>>>,
    index_builds: AtomicU64,
}

/// Minimal application: a text root and a JSON health route.
#[derive(Debug, Clone)]
pub struct StatusApp {
    state: Arc<StatusState>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    started: DateTime<Utc>,
    last_index_build: Option<DateTime<Utc>>,
    index_builds: u64,
}

impl StatusApp {
    pub fn new() -> Self {
        Self {
            state: Arc::new(StatusState {
                started: Utc::now(),
                last_index_build: RwLock::new(None),
                index_builds: AtomicU64::new(0),
            }),
        }
    }

    pub fn index_builds(&self) -> u64 {
        self.state.index_builds.load(Ordering::Relaxed)
    }
}

impl Default for StatusApp {
    fn default() -> Self {
        Self::new()
    }
}

async fn root() -> &'static str {
    concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION"), "\n")
}

async fn health(State(state): State<Arc<StatusState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        started: state.started,
        last_index_build: *state.last_index_build.read(),
        index_builds: state.index_builds.load(Ordering::Relaxed),
    })
}

#[async_trait]
impl Application for StatusApp {
    fn request_handler(&self) -> anyhow::Result<Router> {
        Ok(Router::new()
            .route("/", get(root))
            .route("/health", get(health))
            .with_state(Arc::clone(&self.state)))
    }

    fn maintenance(&self) -> Arc<dyn Maintenance> {
        Arc::new(IndexRebuild {
            state: Arc::clone(&self.state),
        })
    }

    async fn close(&self) -> anyhow::Result<()> {
        tracing::info!(index_builds = self.index_builds(), "Application closed");
        Ok(())
    }
}

/// Records a rebuild of the (in-memory) search index.
struct IndexRebuild {
    state: Arc<StatusState>,
}

#[async_trait]
impl Maintenance for IndexRebuild {
    async fn run(&self) -> anyhow::Result<()> {
        let now = Utc::now();
        *self.state.last_index_build.write() = Some(now);
        let builds = self.state.index_builds.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::info!(builds, "Rebuilt search index");
        Ok(())
    }
}
