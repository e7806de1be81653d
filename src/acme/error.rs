//! Error types for certificate automation.

use std::sync::Arc;

/// Failure reading or writing the certificate cache directory.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("certificate cache I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("certificate cache metadata is malformed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure inside the issuance protocol.
#[derive(Debug, thiserror::Error)]
pub enum IssueError {
    #[error("ACME protocol error: {0}")]
    Acme(#[from] instant_acme::Error),
    #[error("failed to build certificate request: {0}")]
    Csr(#[from] rcgen::Error),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("ACME account credentials are malformed: {0}")]
    Credentials(#[from] serde_json::Error),
    #[error("authorization for {host} is {status}")]
    Authorization { host: String, status: String },
    #[error("no http-01 challenge offered for {0}")]
    NoHttpChallenge(String),
    #[error("order for {0} became invalid")]
    OrderInvalid(String),
    #[error("order for {0} did not become ready in time")]
    OrderTimeout(String),
    #[error("issuer rejected {host}: {reason}")]
    Rejected { host: String, reason: String },
}

/// Hostname refused by the allow-list policy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}: {host}")]
pub struct Denied {
    /// The name as presented, before normalization.
    pub host: String,
    pub reason: &'static str,
}

/// Why no certificate could be produced for a handshake.
///
/// Cloneable so one outcome can be shared by every handshake waiting on the
/// same in-flight issuance.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CertificateError {
    #[error(transparent)]
    Denied(#[from] Denied),
    #[error("missing server name")]
    MissingServerName,
    #[error("certificate issuance for {host} failed: {source}")]
    Issuance {
        host: String,
        #[source]
        source: Arc<IssueError>,
    },
    #[error(transparent)]
    Storage(Arc<StorageError>),
    #[error("invalid certificate material for {host}: {reason}")]
    InvalidMaterial { host: String, reason: String },
    #[error("certificate task for {0} was cancelled")]
    Cancelled(String),
}

impl From<StorageError> for CertificateError {
    fn from(e: StorageError) -> Self {
        Self::Storage(Arc::new(e))
    }
}
