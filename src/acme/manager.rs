//! Certificate selection for TLS handshakes.
//!
//! # Lookup Flow
//! ```text
//! SNI hostname
//!     → HostPolicy (deny anything outside the allowed suffix)
//!     → memory (ready material; renew in background when close to expiry)
//!     → in-flight fetch for the same host? await it
//!     → otherwise start one fetch: disk cache, then Issuer on miss/expiry
//!       (issued material is persisted before it is handed out)
//! ```
//!
//! At most one fetch per hostname runs at a time; every concurrent handshake
//! for that hostname awaits the same result. Fetches run in their own task so
//! a handshake that gives up does not cancel issuance for the others.
//!
//! A failed background renewal is retried no sooner than one minute later,
//! doubling per consecutive failure up to an hour.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use rustls::ServerConfig;
use tokio::time::Instant;

use super::challenge::ChallengeManager;
use super::error::{CertificateError, Denied, StorageError};
use super::issuer::{AcmeIssuer, Issuer};
use super::policy::HostPolicy;
use super::storage::{CertificateMeta, CertificateStorage};
use crate::config::ServiceConfig;
use crate::net::tls::server_config_from_pem;
use crate::observability::metrics;

const RENEW_RETRY_MIN: Duration = Duration::from_secs(60);
const RENEW_RETRY_MAX: Duration = Duration::from_secs(3600);

type Pending = Shared<BoxFuture<'static, Result<Arc<CertifiedMaterial>, CertificateError>>>;

/// Certificate chain and key ready to be presented for one hostname.
#[derive(Debug)]
pub struct CertifiedMaterial {
    hostname: String,
    not_after: DateTime<Utc>,
    server_config: Arc<ServerConfig>,
}

impl CertifiedMaterial {
    pub fn from_pem(hostname: &str, cert_pem: &str, key_pem: &str) -> Result<Self, CertificateError> {
        let invalid = |reason: String| CertificateError::InvalidMaterial {
            host: hostname.to_string(),
            reason,
        };
        let not_after = certificate_expiry(cert_pem).map_err(invalid)?;
        let server_config = server_config_from_pem(cert_pem, key_pem).map_err(|e| invalid(e.to_string()))?;
        Ok(Self {
            hostname: hostname.to_string(),
            not_after,
            server_config,
        })
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    pub fn server_config(&self) -> Arc<ServerConfig> {
        Arc::clone(&self.server_config)
    }
}

/// Expiry of the leaf (first) certificate in a PEM chain.
pub fn certificate_expiry(cert_pem: &str) -> Result<DateTime<Utc>, String> {
    let (_, pem) = x509_parser::pem::parse_x509_pem(cert_pem.as_bytes()).map_err(|e| e.to_string())?;
    let cert = pem.parse_x509().map_err(|e| e.to_string())?;
    let timestamp = cert.validity().not_after.timestamp();
    DateTime::from_timestamp(timestamp, 0).ok_or_else(|| format!("expiry out of range: {timestamp}"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchMode {
    /// Try the disk cache before issuing.
    Load,
    /// Skip the disk cache; its material is known to be stale.
    Issue,
    /// Replace material that is still being served.
    Renew,
}

#[derive(Debug, Clone, Copy)]
struct RenewBackoff {
    failures: u32,
    retry_at: Instant,
}

#[derive(Default)]
struct CacheState {
    ready: HashMap<String, Arc<CertifiedMaterial>>,
    inflight: HashMap<String, Pending>,
    renew_backoff: HashMap<String, RenewBackoff>,
}

impl CacheState {
    fn renewal_due(&self, hostname: &str) -> bool {
        self.renew_backoff
            .get(hostname)
            .map_or(true, |backoff| backoff.retry_at <= Instant::now())
    }

    /// Record a failed renewal and return how long to hold off.
    fn renewal_failed(&mut self, hostname: &str) -> Duration {
        let failures = self.renew_backoff.get(hostname).map_or(0, |b| b.failures) + 1;
        let wait = RENEW_RETRY_MIN
            .saturating_mul(1 << (failures - 1).min(6))
            .min(RENEW_RETRY_MAX);
        self.renew_backoff.insert(
            hostname.to_string(),
            RenewBackoff {
                failures,
                retry_at: Instant::now() + wait,
            },
        );
        wait
    }
}

/// Gatekeeper and cache in front of certificate issuance.
pub struct CertificateManager {
    policy: HostPolicy,
    storage: Arc<CertificateStorage>,
    issuer: Arc<dyn Issuer>,
    challenges: ChallengeManager,
    renew_before: chrono::Duration,
    state: Mutex<CacheState>,
}

impl CertificateManager {
    pub fn new(policy: HostPolicy, storage: Arc<CertificateStorage>, issuer: Arc<dyn Issuer>) -> Self {
        Self {
            policy,
            storage,
            issuer,
            challenges: ChallengeManager::new(),
            renew_before: chrono::Duration::days(30),
            state: Mutex::new(CacheState::default()),
        }
    }

    /// ACME-backed manager for the `[tls]` section of `config`.
    pub fn from_config(config: &ServiceConfig) -> Result<Arc<Self>, StorageError> {
        let storage = Arc::new(CertificateStorage::new(&config.cache_dir())?);
        let challenges = ChallengeManager::new();
        let issuer = AcmeIssuer::new(
            config.tls.directory_url.clone(),
            config.tls.contact_email.clone(),
            Arc::clone(&storage),
            challenges.clone(),
        );

        tracing::info!(
            allowed_host_suffix = %config.tls.allowed_host_suffix,
            cache_dir = %storage.base_path().display(),
            "Certificate automation enabled"
        );

        let manager = Self::new(
            HostPolicy::new(&config.tls.allowed_host_suffix),
            storage,
            Arc::new(issuer),
        )
        .with_challenges(challenges)
        .with_renew_before(chrono::Duration::days(i64::from(config.tls.renew_before_days)));
        Ok(Arc::new(manager))
    }

    /// Share an existing challenge table, e.g. the one the issuer publishes to.
    pub fn with_challenges(mut self, challenges: ChallengeManager) -> Self {
        self.challenges = challenges;
        self
    }

    pub fn with_renew_before(mut self, renew_before: chrono::Duration) -> Self {
        self.renew_before = renew_before;
        self
    }

    /// Challenge tokens to be answered on the plain listener.
    pub fn challenges(&self) -> &ChallengeManager {
        &self.challenges
    }

    /// Apply the allow-list policy. Returns the normalized hostname.
    pub fn authorize(&self, hostname: &str) -> Result<String, Denied> {
        self.policy.check(hostname).inspect_err(|denied| {
            metrics::record_denied();
            tracing::warn!(host = %denied.host, reason = denied.reason, "Certificate request denied");
        })
    }

    /// Material to present for a handshake carrying `server_name`.
    pub async fn certificate_for(
        self: &Arc<Self>,
        server_name: Option<&str>,
    ) -> Result<Arc<CertifiedMaterial>, CertificateError> {
        let hostname = self.authorize(server_name.ok_or(CertificateError::MissingServerName)?)?;

        let pending = {
            let mut state = self.state.lock();
            let mut mode = FetchMode::Load;

            if let Some(material) = state.ready.get(&hostname).cloned() {
                let now = Utc::now();
                if material.not_after > now {
                    if material.not_after - self.renew_before <= now
                        && !state.inflight.contains_key(&hostname)
                        && state.renewal_due(&hostname)
                    {
                        tracing::info!(hostname = %hostname, expires = %material.not_after, "Renewing certificate in background");
                        self.start_fetch(&mut state, &hostname, FetchMode::Renew);
                    }
                    return Ok(material);
                }
                tracing::info!(hostname = %hostname, expired = %material.not_after, "Cached certificate expired");
                state.ready.remove(&hostname);
                mode = FetchMode::Issue;
            }

            match state.inflight.get(&hostname) {
                Some(pending) => pending.clone(),
                None => self.start_fetch(&mut state, &hostname, mode),
            }
        };

        pending.await
    }

    fn start_fetch(self: &Arc<Self>, state: &mut CacheState, hostname: &str, mode: FetchMode) -> Pending {
        let manager = Arc::clone(self);
        let host = hostname.to_string();
        let task = tokio::spawn(async move {
            let result = manager.fetch(&host, mode).await.map(Arc::new);
            let mut state = manager.state.lock();
            state.inflight.remove(&host);
            match &result {
                Ok(material) => {
                    state.renew_backoff.remove(&host);
                    state.ready.insert(host, Arc::clone(material));
                }
                Err(_) if mode == FetchMode::Renew => {
                    let wait = state.renewal_failed(&host);
                    tracing::warn!(hostname = %host, retry_in_secs = wait.as_secs(), "Certificate renewal failed, backing off");
                }
                Err(_) => {}
            }
            result
        });

        let host = hostname.to_string();
        let pending = async move {
            match task.await {
                Ok(result) => result,
                Err(_) => Err(CertificateError::Cancelled(host)),
            }
        }
        .boxed()
        .shared();

        state.inflight.insert(hostname.to_string(), pending.clone());
        pending
    }

    async fn fetch(&self, hostname: &str, mode: FetchMode) -> Result<CertifiedMaterial, CertificateError> {
        if mode == FetchMode::Load {
            if let Some(material) = self.load_cached(hostname) {
                return Ok(material);
            }
        }

        let issued = match self.issuer.issue(hostname).await {
            Ok(issued) => issued,
            Err(e) => {
                metrics::record_issuance("error");
                tracing::error!(hostname = %hostname, error = %e, "Certificate issuance failed");
                return Err(CertificateError::Issuance {
                    host: hostname.to_string(),
                    source: Arc::new(e),
                });
            }
        };
        metrics::record_issuance("ok");

        let material = CertifiedMaterial::from_pem(hostname, &issued.cert_chain_pem, &issued.key_pem)?;
        let meta = CertificateMeta {
            issued: Utc::now(),
            expires: material.not_after,
        };
        self.storage
            .save_certificate(hostname, &issued.cert_chain_pem, &issued.key_pem, &meta)?;

        tracing::info!(hostname = %hostname, expires = %material.not_after, "Certificate issued");
        Ok(material)
    }

    /// Unexpired material from disk. Unreadable entries count as a miss.
    fn load_cached(&self, hostname: &str) -> Option<CertifiedMaterial> {
        let stored = match self.storage.load_certificate(hostname) {
            Ok(stored) => stored?,
            Err(e) => {
                tracing::warn!(hostname = %hostname, error = %e, "Unreadable certificate cache entry");
                return None;
            }
        };
        if stored.meta.expires <= Utc::now() {
            tracing::info!(hostname = %hostname, expired = %stored.meta.expires, "Cached certificate expired");
            return None;
        }
        match CertifiedMaterial::from_pem(hostname, &stored.cert_pem, &stored.key_pem) {
            Ok(material) => Some(material),
            Err(e) => {
                tracing::warn!(hostname = %hostname, error = %e, "Invalid certificate cache entry");
                None
            }
        }
    }
}
