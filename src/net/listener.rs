//! Plain and TLS listeners.
//!
//! # Responsibilities
//! - Bind the plain listener and, when certificates are managed, the TLS one
//! - Choose the plain handler: redirect to HTTPS or the application itself,
//!   with ACME challenge paths answered first
//! - Run each listener as its own task; `start` returns once it accepts
//! - Drain all listeners on shutdown and report how each one ended

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum_server::Handle;
use futures_util::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::acceptor::AcmeAcceptor;
use crate::acme::CertificateManager;
use crate::config::ServiceConfig;
use crate::http::challenge::with_challenges;
use crate::http::redirect::redirect_router;

/// Time allowed past the drain deadline for a listener task to wind down
/// after its remaining connections were force-closed.
const FORCE_CLOSE_MARGIN: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerKind {
    Plain,
    Tls,
}

impl fmt::Display for ListenerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerKind::Plain => f.write_str("plain"),
            ListenerKind::Tls => f.write_str("tls"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("invalid {kind} listener address {value:?}: {source}")]
    InvalidAddress {
        kind: ListenerKind,
        value: String,
        source: std::net::AddrParseError,
    },
    #[error("failed to bind {kind} listener on {addr}: {source}")]
    Bind {
        kind: ListenerKind,
        addr: SocketAddr,
        source: io::Error,
    },
}

/// How one listener ended.
#[derive(Debug)]
pub struct ListenerReport {
    pub kind: ListenerKind,
    /// Address the listener was bound to.
    pub addr: SocketAddr,
    /// Set when the listener stopped for a reason other than shutdown.
    pub error: Option<io::Error>,
    /// The task outlived the drain deadline and was aborted.
    pub forced: bool,
}

/// One running listener task.
pub struct ListenerHandle {
    kind: ListenerKind,
    addr: SocketAddr,
    server: Handle,
    task: JoinHandle<io::Result<()>>,
}

impl ListenerHandle {
    pub fn kind(&self) -> ListenerKind {
        self.kind
    }

    /// Address actually bound (resolves port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    async fn wait(mut self, limit: Duration) -> ListenerReport {
        let (error, forced) = match tokio::time::timeout(limit, &mut self.task).await {
            Ok(Ok(Ok(()))) => (None, false),
            Ok(Ok(Err(e))) => (Some(e), false),
            Ok(Err(join)) => (Some(io::Error::other(join)), false),
            Err(_) => {
                self.task.abort();
                (None, true)
            }
        };

        match (&error, forced) {
            (Some(e), _) => tracing::error!(kind = %self.kind, address = %self.addr, error = %e, "Listener failed"),
            (None, true) => tracing::warn!(kind = %self.kind, address = %self.addr, "Listener aborted after drain deadline"),
            (None, false) => tracing::info!(kind = %self.kind, address = %self.addr, "Listener stopped"),
        }

        ListenerReport {
            kind: self.kind,
            addr: self.addr,
            error,
            forced,
        }
    }
}

type Exits = mpsc::UnboundedSender<ListenerKind>;

/// All listeners of the process.
pub struct ListenerSet {
    listeners: Vec<ListenerHandle>,
    exits: mpsc::UnboundedReceiver<ListenerKind>,
}

impl ListenerSet {
    /// Start the plain listener and, when `certificates` is given, the TLS one.
    ///
    /// Returns after every listener is accepting connections. If any fails to
    /// bind, those already started are shut down again.
    pub async fn start(
        config: &ServiceConfig,
        handler: Router,
        certificates: Option<Arc<CertificateManager>>,
    ) -> Result<Self, ListenerError> {
        let (exits_tx, exits) = mpsc::unbounded_channel();
        let mut set = Self {
            listeners: Vec::with_capacity(2),
            exits,
        };

        let mut plain_handler = match &certificates {
            Some(_) if config.tls.redirect_http_to_https => redirect_router(),
            _ => handler.clone(),
        };
        if let Some(certificates) = &certificates {
            plain_handler = with_challenges(plain_handler, certificates.challenges().clone());
        }

        let plain_addr = parse_addr(ListenerKind::Plain, &config.listener.http_address)?;
        set.listeners
            .push(start_plain(plain_addr, plain_handler, exits_tx.clone()).await?);

        if let Some(certificates) = certificates {
            let tls = parse_addr(ListenerKind::Tls, &config.tls.https_address).map(|addr| {
                let acceptor = AcmeAcceptor::new(certificates, config.tls.handshake_timeout());
                (addr, acceptor)
            });
            let started = match tls {
                Ok((addr, acceptor)) => start_tls(addr, handler, acceptor, exits_tx).await,
                Err(e) => Err(e),
            };
            match started {
                Ok(listener) => set.listeners.push(listener),
                Err(e) => {
                    set.shutdown(Duration::ZERO).await;
                    return Err(e);
                }
            }
        }

        Ok(set)
    }

    pub fn listeners(&self) -> &[ListenerHandle] {
        &self.listeners
    }

    /// Bound address of the first listener of `kind`.
    pub fn local_addr(&self, kind: ListenerKind) -> Option<SocketAddr> {
        self.listeners
            .iter()
            .find(|l| l.kind == kind)
            .map(|l| l.addr)
    }

    /// Resolves when a listener task ends without having been asked to.
    /// Pending forever once every listener has ended.
    pub async fn exited(&mut self) -> ListenerKind {
        match self.exits.recv().await {
            Some(kind) => kind,
            None => std::future::pending().await,
        }
    }

    /// Stop accepting, let in-flight requests finish within `deadline`, then
    /// force-close what remains. Returns once every listener task is done.
    pub async fn shutdown(self, deadline: Duration) -> Vec<ListenerReport> {
        for listener in &self.listeners {
            tracing::info!(
                kind = %listener.kind,
                address = %listener.addr,
                connections = listener.server.connection_count(),
                deadline = ?deadline,
                "Draining listener"
            );
            listener.server.graceful_shutdown(Some(deadline));
        }

        let limit = deadline + FORCE_CLOSE_MARGIN;
        join_all(self.listeners.into_iter().map(|l| l.wait(limit))).await
    }
}

fn parse_addr(kind: ListenerKind, value: &str) -> Result<SocketAddr, ListenerError> {
    value
        .parse()
        .map_err(|source| ListenerError::InvalidAddress {
            kind,
            value: value.to_string(),
            source,
        })
}

async fn start_plain(addr: SocketAddr, router: Router, exits: Exits) -> Result<ListenerHandle, ListenerError> {
    let server = Handle::new();
    let serve = axum_server::bind(addr)
        .handle(server.clone())
        .serve(router.into_make_service_with_connect_info::<SocketAddr>());
    let task = tokio::spawn(report_exit(ListenerKind::Plain, serve, exits));
    await_listening(ListenerKind::Plain, addr, server, task).await
}

async fn start_tls(
    addr: SocketAddr,
    router: Router,
    acceptor: AcmeAcceptor,
    exits: Exits,
) -> Result<ListenerHandle, ListenerError> {
    let server = Handle::new();
    let serve = axum_server::bind(addr)
        .acceptor(acceptor)
        .handle(server.clone())
        .serve(router.into_make_service_with_connect_info::<SocketAddr>());
    let task = tokio::spawn(report_exit(ListenerKind::Tls, serve, exits));
    await_listening(ListenerKind::Tls, addr, server, task).await
}

async fn report_exit<F>(kind: ListenerKind, serve: F, exits: Exits) -> io::Result<()>
where
    F: std::future::Future<Output = io::Result<()>>,
{
    let result = serve.await;
    let _ = exits.send(kind);
    result
}

async fn await_listening(
    kind: ListenerKind,
    requested: SocketAddr,
    server: Handle,
    task: JoinHandle<io::Result<()>>,
) -> Result<ListenerHandle, ListenerError> {
    match server.listening().await {
        Some(addr) => {
            tracing::info!(kind = %kind, address = %addr, "Listener accepting connections");
            Ok(ListenerHandle {
                kind,
                addr,
                server,
                task,
            })
        }
        None => {
            let source = match task.await {
                Ok(Err(e)) => e,
                Ok(Ok(())) => io::Error::other("listener exited before binding"),
                Err(join) => io::Error::other(join),
            };
            Err(ListenerError::Bind {
                kind,
                addr: requested,
                source,
            })
        }
    }
}
