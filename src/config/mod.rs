//! Settings Management Module for the DocuSync watchdog
//!
//! Provides persistent settings storage with:
//! - JSON file-based storage
//! - Import/export functionality
//! - Thread-safe access
//! - Conversion into monitor and supervisor timing

mod settings;
mod storage;
#[cfg(test)]
mod tests;

pub use settings::{
    expand_env_vars, ChildSettings, HeartbeatSettings, RestartSettings, SyncSettings,
    WatchdogSettings,
};
pub use storage::{ConfigError, ConfigResult, SettingsStore, SettingsStoreConfig};
