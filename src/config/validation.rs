//! Configuration validation.
//!
//! Semantic checks on top of what serde already enforces. Every problem is
//! collected so an operator sees the full list in one run.

use std::net::SocketAddr;

use crate::config::schema::ServiceConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{field} is not a socket address: {value:?}")]
    InvalidAddress { field: &'static str, value: String },
    #[error("tls.allowed_host_suffix must be set when tls is enabled")]
    MissingHostSuffix,
    #[error("tls.directory_url is not a valid URL: {0}")]
    InvalidDirectoryUrl(String),
    #[error("tls.redirect_http_to_https requires tls.enabled")]
    RedirectWithoutTls,
    #[error("listener.shutdown_timeout_secs must be greater than zero")]
    ZeroShutdownTimeout,
    #[error("tls.handshake_timeout_secs must be greater than zero")]
    ZeroHandshakeTimeout,
}

/// Validate a parsed configuration, returning every problem found.
pub fn validate_config(config: &ServiceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address(&mut errors, "listener.http_address", &config.listener.http_address);
    if config.listener.shutdown_timeout_secs == 0 {
        errors.push(ValidationError::ZeroShutdownTimeout);
    }

    if config.tls.enabled {
        check_address(&mut errors, "tls.https_address", &config.tls.https_address);
        if config.tls.allowed_host_suffix.trim_matches('.').is_empty() {
            errors.push(ValidationError::MissingHostSuffix);
        }
        if let Err(e) = url::Url::parse(&config.tls.directory_url) {
            errors.push(ValidationError::InvalidDirectoryUrl(e.to_string()));
        }
        if config.tls.handshake_timeout_secs == 0 {
            errors.push(ValidationError::ZeroHandshakeTimeout);
        }
    } else if config.tls.redirect_http_to_https {
        errors.push(ValidationError::RedirectWithoutTls);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        });
    }
}
