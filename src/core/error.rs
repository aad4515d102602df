//! Error types for DocuSync Watchdog
//!
//! Each subsystem owns its error enum; `DocuSyncError` gathers them for
//! callers that drive more than one subsystem, such as the binaries.

use thiserror::Error;

use crate::config::ConfigError;
use crate::logging::LoggingError;
use crate::mirror::MirrorError;
use crate::watchdog::{ChannelError, WatchdogError, EXIT_CONFIG, EXIT_FAILURE, EXIT_LAUNCH_FAILED};

/// Result type alias for DocuSync operations
pub type Result<T> = std::result::Result<T, DocuSyncError>;

/// Main error type for DocuSync Watchdog
#[derive(Error, Debug)]
pub enum DocuSyncError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Logging error: {0}")]
    Logging(#[from] LoggingError),

    #[error("Heartbeat channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Watchdog error: {0}")]
    Watchdog(#[from] WatchdogError),

    #[error("Mirror error: {0}")]
    Mirror(#[from] MirrorError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DocuSyncError {
    /// Process exit code reported when this error ends the watchdog
    pub fn exit_code(&self) -> i32 {
        match self {
            DocuSyncError::Config(_) | DocuSyncError::Logging(_) => EXIT_CONFIG,
            DocuSyncError::Watchdog(WatchdogError::ProcessLaunch { .. }) => EXIT_LAUNCH_FAILED,
            _ => EXIT_FAILURE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_error_conversion() {
        let config_err = ConfigError::Invalid("heartbeat.timeout_ms must be positive".into());
        let err: DocuSyncError = config_err.into();
        assert!(matches!(err, DocuSyncError::Config(_)));

        let io_err = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err: DocuSyncError = io_err.into();
        assert!(matches!(err, DocuSyncError::Io(_)));
    }

    #[test]
    fn test_error_display() {
        let err: DocuSyncError = MirrorError::Failed {
            code: 16,
            stderr: "ERROR 5".into(),
        }
        .into();
        assert_eq!(err.to_string(), "Mirror error: Robocopy failed (code 16): ERROR 5");
    }

    #[test]
    fn test_exit_codes() {
        let config: DocuSyncError = ConfigError::NotFound(PathBuf::from("settings.json")).into();
        assert_eq!(config.exit_code(), EXIT_CONFIG);

        let launch: DocuSyncError = WatchdogError::ProcessLaunch {
            executable: PathBuf::from("DocuSync.exe"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        }
        .into();
        assert_eq!(launch.exit_code(), EXIT_LAUNCH_FAILED);

        let watcher: DocuSyncError = WatchdogError::WatcherPanicked.into();
        assert_eq!(watcher.exit_code(), EXIT_FAILURE);

        let mirror: DocuSyncError = MirrorError::MissingPath("Remote").into();
        assert_eq!(mirror.exit_code(), EXIT_FAILURE);
    }
}
