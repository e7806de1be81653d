//! Process lifecycle: start everything, wait for a signal, drain, stop.
//!
//! ```text
//! Starting ──listeners accepting──▶ Running ──signal──▶ Draining ──drained──▶ Stopped
//! ```
//!
//! There is no way back; one orchestrator runs one lifecycle.

use std::future::Future;
use std::io;
use std::sync::Arc;

use tokio::sync::watch;

use super::shutdown::Shutdown;
use super::signals::SignalQueue;
use super::startup::{open_access_log, verify_directories, StartupError};
use crate::acme::{CertificateManager, StorageError};
use crate::app::Application;
use crate::config::ServiceConfig;
use crate::http::build_handler;
use crate::net::{ListenerError, ListenerSet};
use crate::scheduler::DailyScheduler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Starting,
    Running,
    Draining,
    Stopped,
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Startup(#[from] StartupError),
    #[error("failed to construct request handler: {0:#}")]
    Handler(anyhow::Error),
    #[error("failed to open certificate cache: {0}")]
    Certificates(#[from] StorageError),
    #[error(transparent)]
    Listener(#[from] ListenerError),
    #[error("failed to install signal handlers: {0}")]
    Signals(io::Error),
    #[error("{count} listener(s) stopped with an error")]
    ListenersFailed { count: usize },
}

pub struct LifecycleOrchestrator {
    config: ServiceConfig,
    app: Arc<dyn Application>,
    certificates: Option<Arc<CertificateManager>>,
    state: watch::Sender<LifecycleState>,
}

impl LifecycleOrchestrator {
    pub fn new(config: ServiceConfig, app: Arc<dyn Application>) -> Self {
        let (state, _) = watch::channel(LifecycleState::Starting);
        Self {
            config,
            app,
            certificates: None,
            state,
        }
    }

    /// Use `certificates` instead of building an ACME-backed manager from the
    /// TLS configuration. Only consulted when TLS is enabled.
    pub fn with_certificates(mut self, certificates: Arc<CertificateManager>) -> Self {
        self.certificates = Some(certificates);
        self
    }

    /// Observe lifecycle transitions.
    pub fn state(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Run until SIGINT or SIGTERM.
    pub async fn run(self) -> Result<(), LifecycleError> {
        // Installed first so a signal during startup is queued, not fatal.
        let mut signals = SignalQueue::install().map_err(LifecycleError::Signals)?;
        self.run_until(async move {
            signals.recv().await;
        })
        .await
    }

    /// Run until `stop` resolves.
    pub async fn run_until<F>(mut self, stop: F) -> Result<(), LifecycleError>
    where
        F: Future<Output = ()>,
    {
        let result = self.lifecycle(stop).await;
        self.transition(LifecycleState::Stopped);
        result
    }

    async fn lifecycle<F>(&mut self, stop: F) -> Result<(), LifecycleError>
    where
        F: Future<Output = ()>,
    {
        let preset_certificates = self.certificates.take();
        let config = &self.config;
        verify_directories(config)?;
        let access_log = open_access_log(config)?;

        let handler = self.app.request_handler().map_err(LifecycleError::Handler)?;
        let handler = build_handler(handler, access_log);

        let certificates = match (config.tls.enabled, preset_certificates) {
            (false, _) => None,
            (true, Some(certificates)) => Some(certificates),
            (true, None) => Some(CertificateManager::from_config(config)?),
        };

        let mut listeners = ListenerSet::start(config, handler, certificates).await?;

        let shutdown = Shutdown::new();
        if config.scheduler.enabled {
            DailyScheduler::new(self.app.maintenance())
                .run_on_start(config.scheduler.run_on_start)
                .spawn(shutdown.listener());
        }

        self.transition(LifecycleState::Running);

        tokio::select! {
            () = stop => {}
            kind = listeners.exited() => {
                tracing::error!(kind = %kind, "Listener stopped unexpectedly, shutting down");
            }
        }

        self.transition(LifecycleState::Draining);
        shutdown.trigger();
        let reports = listeners.shutdown(self.config.listener.shutdown_timeout()).await;

        if let Err(e) = self.app.close().await {
            tracing::error!(error = %e, "Failed to close application");
        }

        let failed = reports.iter().filter(|r| r.error.is_some()).count();
        if failed > 0 {
            return Err(LifecycleError::ListenersFailed { count: failed });
        }
        tracing::info!("Shutdown complete");
        Ok(())
    }

    fn transition(&self, next: LifecycleState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::info!(from = ?previous, to = ?next, "Lifecycle transition");
        }
    }
}
