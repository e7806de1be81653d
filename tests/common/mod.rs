//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tempfile::TempDir;
use tokio::sync::watch;

use notes_server::acme::{
    CertificateManager, CertificateStorage, HostPolicy, IssueError, IssuedCertificate, Issuer,
};
use notes_server::http::UserId;
use notes_server::scheduler::Maintenance;
use notes_server::{Application, LifecycleState, ServiceConfig};

pub const SLOW_REQUEST: Duration = Duration::from_millis(500);
/// Far longer than any shutdown deadline used in tests.
pub const STUCK_REQUEST: Duration = Duration::from_secs(20);

/// A loopback address that was free a moment ago.
pub fn free_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

/// Config rooted in a fresh data directory (with its `log/`), plain only.
pub fn test_config() -> (TempDir, ServiceConfig) {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir(dir.path().join("log")).unwrap();

    let mut config = ServiceConfig::default();
    config.storage.data_dir = dir.path().to_path_buf();
    config.listener.http_address = free_addr().to_string();
    config.listener.shutdown_timeout_secs = 5;
    (dir, config)
}

/// Daily access log files written into `dir`.
pub fn access_log_files(dir: &std::path::Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| path.to_string_lossy().ends_with("http.txt"))
        .collect()
}

pub async fn wait_for_state(state: &mut watch::Receiver<LifecycleState>, wanted: LifecycleState) {
    tokio::time::timeout(Duration::from_secs(5), state.wait_for(|s| *s == wanted))
        .await
        .expect("lifecycle state not reached in time")
        .unwrap();
}

/// Application recording what the lifecycle did to it.
#[derive(Default)]
pub struct TestApp {
    pub closed: AtomicBool,
    pub maintenance_runs: Arc<AtomicU32>,
}

impl TestApp {
    pub fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn maintenance_runs(&self) -> u32 {
        self.maintenance_runs.load(Ordering::SeqCst)
    }
}

struct CountingMaintenance(Arc<AtomicU32>);

#[async_trait]
impl Maintenance for CountingMaintenance {
    async fn run(&self) -> anyhow::Result<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl Application for TestApp {
    fn request_handler(&self) -> anyhow::Result<Router> {
        Ok(Router::new()
            .route("/", get(|| async { "ok" }))
            .route("/notes/{id}", get(|| async { "note" }))
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(SLOW_REQUEST).await;
                    "slow"
                }),
            )
            .route(
                "/stuck",
                get(|| async {
                    tokio::time::sleep(STUCK_REQUEST).await;
                    "stuck"
                }),
            )
            .route(
                "/me",
                get(|| async {
                    let mut response = "me".into_response();
                    response.extensions_mut().insert(UserId(7));
                    response
                }),
            ))
    }

    fn maintenance(&self) -> Arc<dyn Maintenance> {
        Arc::new(CountingMaintenance(Arc::clone(&self.maintenance_runs)))
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Issues self-signed certificates and counts calls.
#[derive(Default)]
pub struct MockIssuer {
    pub calls: AtomicU32,
}

impl MockIssuer {
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Issuer for MockIssuer {
    async fn issue(&self, hostname: &str) -> Result<IssuedCertificate, IssueError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        let key = rcgen::KeyPair::generate()?;
        let cert = rcgen::CertificateParams::new(vec![hostname.to_string()])?.self_signed(&key)?;
        Ok(IssuedCertificate {
            cert_chain_pem: cert.pem(),
            key_pem: key.serialize_pem(),
        })
    }
}

/// Certificate manager for `suffix` backed by `issuer`, caching under `dir`.
pub fn mock_certificates(
    dir: &std::path::Path,
    suffix: &str,
    issuer: Arc<MockIssuer>,
) -> Arc<CertificateManager> {
    let storage = Arc::new(CertificateStorage::new(&dir.join("cache").join("acme")).unwrap());
    Arc::new(CertificateManager::new(HostPolicy::new(suffix), storage, issuer))
}

pub fn install_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

/// HTTP client that does not follow redirects.
pub fn client() -> reqwest::Client {
    install_crypto_provider();
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}
