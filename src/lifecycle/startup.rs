//! Startup preconditions.
//!
//! # Responsibilities
//! - Verify the data and log directories exist before anything binds
//! - Open the access log sink owned by the orchestrator
//!
//! # Design Decisions
//! - Fail fast: a missing directory is fatal and nothing is started
//! - Directories are not created implicitly; a missing data directory usually
//!   means a missing volume mount

use std::io;
use std::path::PathBuf;

use crate::config::ServiceConfig;
use crate::observability::access_log::AccessLogSink;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("directory '{0}' doesn't exist")]
    MissingDirectory(PathBuf),
    #[error("failed to open access log in '{dir}': {source}")]
    AccessLog { dir: PathBuf, source: io::Error },
}

/// Check that every directory the service writes into already exists.
pub fn verify_directories(config: &ServiceConfig) -> Result<(), StartupError> {
    for dir in [config.storage.data_dir.clone(), config.log_dir()] {
        if !dir.is_dir() {
            return Err(StartupError::MissingDirectory(dir));
        }
    }
    tracing::debug!(
        data_dir = %config.storage.data_dir.display(),
        log_dir = %config.log_dir().display(),
        "Directories verified"
    );
    Ok(())
}

/// The daily-rotated access log, or `None` when disabled.
pub fn open_access_log(config: &ServiceConfig) -> Result<Option<AccessLogSink>, StartupError> {
    if !config.observability.access_log {
        return Ok(None);
    }
    let dir = config.log_dir();
    AccessLogSink::daily(&dir)
        .map(Some)
        .map_err(|source| StartupError::AccessLog { dir, source })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(data_dir: &std::path::Path) -> ServiceConfig {
        let mut config = ServiceConfig::default();
        config.storage.data_dir = data_dir.to_path_buf();
        config
    }

    #[test]
    fn test_missing_data_dir_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir.path().join("nope"));
        assert!(matches!(
            verify_directories(&config),
            Err(StartupError::MissingDirectory(p)) if p.ends_with("nope")
        ));
    }

    #[test]
    fn test_missing_log_dir_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        assert!(matches!(
            verify_directories(&config),
            Err(StartupError::MissingDirectory(p)) if p.ends_with("log")
        ));

        std::fs::create_dir(dir.path().join("log")).unwrap();
        assert!(verify_directories(&config).is_ok());
    }

    #[test]
    fn test_access_log_can_be_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.observability.access_log = false;
        assert!(open_access_log(&config).unwrap().is_none());
    }
}
