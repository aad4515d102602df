//! DocuSync Watchdog - heartbeat supervision for the DocuSync application
//!
//! This crate provides:
//! - A named shared-memory heartbeat channel and its writer
//! - The heartbeat monitor and the supervisor restart loop
//! - Persisted watchdog and DocuSync settings
//! - Logging setup with rolling files
//! - The robocopy wrapper DocuSync uses to move finished folders

pub mod config;
pub mod core;
pub mod logging;
pub mod mirror;
pub mod watchdog;

// Re-export commonly used items
pub use crate::core::error::{DocuSyncError, Result};
pub use config::{SettingsStore, SettingsStoreConfig, WatchdogSettings};
pub use logging::{LoggingConfig, LoggingSystem};
pub use mirror::Mirror;
pub use watchdog::{
    HeartbeatChannel, HeartbeatMonitor, HeartbeatSender, HeartbeatWriter, StopReason, Supervisor,
    SupervisorConfig,
};
