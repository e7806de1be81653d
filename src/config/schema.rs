//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the service.
//! All types derive Serde traits for deserialization from config files.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Let's Encrypt production directory.
pub const LETS_ENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";

/// Root configuration for the notes server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// Plain listener settings and shutdown deadline.
    pub listener: ListenerConfig,

    /// Secured listener and certificate automation.
    pub tls: TlsConfig,

    /// Data and log directories.
    pub storage: StorageConfig,

    /// Daily maintenance scheduler.
    pub scheduler: SchedulerConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Plain listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address for the plain listener (e.g., "127.0.0.1:5111").
    pub http_address: String,

    /// How long in-flight requests may run after shutdown is requested.
    pub shutdown_timeout_secs: u64,
}

impl ListenerConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            http_address: "127.0.0.1:5111".to_string(),
            shutdown_timeout_secs: 30,
        }
    }
}

/// Secured listener and automatic certificate configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Start the TLS listener and certificate automation.
    pub enabled: bool,

    /// Serve a permanent redirect to https on the plain listener.
    pub redirect_http_to_https: bool,

    /// Bind address for the TLS listener.
    pub https_address: String,

    /// Certificates are only issued for this domain and its subdomains.
    pub allowed_host_suffix: String,

    /// Certificate cache directory. Defaults to `<data_dir>/cache/acme`.
    pub cache_dir: Option<PathBuf>,

    /// Contact address registered with the ACME account.
    pub contact_email: Option<String>,

    /// ACME directory URL.
    pub directory_url: String,

    /// Re-issue certificates this many days before they expire.
    pub renew_before_days: u32,

    /// Upper bound on a TLS handshake, certificate issuance included.
    pub handshake_timeout_secs: u64,
}

impl TlsConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            redirect_http_to_https: false,
            https_address: "0.0.0.0:443".to_string(),
            allowed_host_suffix: String::new(),
            cache_dir: None,
            contact_email: None,
            directory_url: LETS_ENCRYPT_PRODUCTION.to_string(),
            renew_before_days: 30,
            handshake_timeout_secs: 60,
        }
    }
}

/// On-disk locations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root data directory. Must exist before startup.
    pub data_dir: PathBuf,

    /// Log directory. Defaults to `<data_dir>/log` and must exist.
    pub log_dir: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/data/quicknotes"),
            log_dir: None,
        }
    }
}

/// Daily maintenance scheduler configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Run the daily maintenance task at all.
    pub enabled: bool,

    /// Run maintenance once immediately when the scheduler starts.
    pub run_on_start: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            run_on_start: true,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit diagnostics as JSON lines.
    pub json_logs: bool,

    /// Write the per-request access log.
    pub access_log: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            access_log: true,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

impl ServiceConfig {
    /// Directory holding the daily access and diagnostic logs.
    pub fn log_dir(&self) -> PathBuf {
        self.storage
            .log_dir
            .clone()
            .unwrap_or_else(|| self.storage.data_dir.join("log"))
    }

    /// Directory holding issued certificates and the ACME account.
    pub fn cache_dir(&self) -> PathBuf {
        self.tls
            .cache_dir
            .clone()
            .unwrap_or_else(|| self.storage.data_dir.join("cache").join("acme"))
    }
}
