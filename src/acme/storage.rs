//! Directory-backed certificate cache keyed by hostname.
//!
//! # Directory Structure
//!
//! ```text
//! cache_dir/
//! ├── account.json          # ACME account credentials (opaque, serialized)
//! └── domains/
//!     └── notes.example.com/
//!         ├── cert.pem      # Certificate chain
//!         ├── key.pem       # Private key
//!         └── meta.json     # Issued/expires timestamps
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::StorageError;

/// Metadata stored alongside a certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateMeta {
    /// When the certificate was obtained.
    pub issued: DateTime<Utc>,
    /// Leaf `notAfter`; an entry past this is a cache miss.
    pub expires: DateTime<Utc>,
}

/// A cached certificate and its key.
#[derive(Debug, Clone)]
pub struct StoredCertificate {
    /// Leaf first, then intermediates.
    pub cert_pem: String,
    /// PKCS#8 private key.
    pub key_pem: String,
    pub meta: CertificateMeta,
}

/// Filesystem cache for issued certificates and the ACME account.
#[derive(Debug)]
pub struct CertificateStorage {
    base_path: PathBuf,
}

impl CertificateStorage {
    /// Open (creating if needed) the cache at `base_path`. Directories are
    /// restricted to the owner on Unix.
    pub fn new(base_path: &Path) -> Result<Self, StorageError> {
        let domains_path = base_path.join("domains");
        fs::create_dir_all(&domains_path)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o700);
            fs::set_permissions(base_path, perms.clone())?;
            fs::set_permissions(&domains_path, perms)?;
        }

        tracing::info!(storage_path = %base_path.display(), "Certificate cache ready");

        Ok(Self {
            base_path: base_path.to_path_buf(),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn domain_path(&self, hostname: &str) -> PathBuf {
        self.base_path.join("domains").join(hostname)
    }

    pub fn load_credentials_json(&self) -> Result<Option<String>, StorageError> {
        let path = self.base_path.join("account.json");
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read_to_string(path)?))
    }

    pub fn save_credentials_json(&self, json: &str) -> Result<(), StorageError> {
        let path = self.base_path.join("account.json");
        write_private(&path, json)?;
        tracing::info!("Saved ACME account credentials");
        Ok(())
    }

    /// Cached material for `hostname`, if all three files are present.
    pub fn load_certificate(&self, hostname: &str) -> Result<Option<StoredCertificate>, StorageError> {
        let dir = self.domain_path(hostname);
        let cert_path = dir.join("cert.pem");
        let key_path = dir.join("key.pem");
        let meta_path = dir.join("meta.json");

        if !cert_path.exists() || !key_path.exists() || !meta_path.exists() {
            tracing::trace!(hostname = %hostname, "No cached certificate");
            return Ok(None);
        }

        let cert_pem = fs::read_to_string(cert_path)?;
        let key_pem = fs::read_to_string(key_path)?;
        let meta: CertificateMeta = serde_json::from_str(&fs::read_to_string(meta_path)?)?;

        tracing::debug!(hostname = %hostname, expires = %meta.expires, "Loaded cached certificate");
        Ok(Some(StoredCertificate {
            cert_pem,
            key_pem,
            meta,
        }))
    }

    /// Persist material for `hostname`. The metadata file is written last, so
    /// an interrupted save reads back as a miss.
    pub fn save_certificate(
        &self,
        hostname: &str,
        cert_pem: &str,
        key_pem: &str,
        meta: &CertificateMeta,
    ) -> Result<(), StorageError> {
        let dir = self.domain_path(hostname);
        fs::create_dir_all(&dir)?;

        let meta_path = dir.join("meta.json");
        if meta_path.exists() {
            fs::remove_file(&meta_path)?;
        }
        fs::write(dir.join("cert.pem"), cert_pem)?;
        write_private(&dir.join("key.pem"), key_pem)?;
        fs::write(&meta_path, serde_json::to_string_pretty(meta)?)?;

        tracing::info!(hostname = %hostname, expires = %meta.expires, "Saved certificate to cache");
        Ok(())
    }
}

fn write_private(path: &Path, contents: &str) -> Result<(), StorageError> {
    fs::write(path, contents)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}
