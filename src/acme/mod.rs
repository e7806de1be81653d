//! Automatic certificate management.
//!
//! # Data Flow
//! ```text
//! TLS handshake (SNI)
//!     → manager.rs (policy gate, memory cache, single-flight fetch)
//!     → storage.rs (directory cache, survives restarts)
//!     → issuer.rs (ACME order on miss or expiry)
//!         ↔ challenge.rs (HTTP-01 tokens served on the plain listener)
//! ```
//!
//! # Design Decisions
//! - Policy is checked before any cache lookup, so a disallowed name never
//!   gets a certificate even if one was planted on disk
//! - One issuance per hostname at a time; concurrent handshakes share it
//! - Failures are not cached; the next handshake retries

pub mod challenge;
pub mod error;
pub mod issuer;
pub mod manager;
pub mod policy;
pub mod storage;

pub use challenge::{ChallengeManager, ACME_CHALLENGE_ROUTE};
pub use error::{CertificateError, Denied, IssueError, StorageError};
pub use issuer::{AcmeIssuer, IssuedCertificate, Issuer};
pub use manager::{CertificateManager, CertifiedMaterial};
pub use policy::HostPolicy;
pub use storage::{CertificateMeta, CertificateStorage, StoredCertificate};
