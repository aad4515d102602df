//! Settings Storage Implementation
//!
//! Provides JSON file-based settings storage with:
//! - Atomic writes using temp file + rename
//! - Automatic backup before writes
//! - Thread-safe access via RwLock
//! - Default settings generation

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::RwLock;

use super::settings::WatchdogSettings;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Settings file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid settings: {0}")]
    Invalid(String),
}

/// Configuration result type
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Settings store options
#[derive(Debug, Clone)]
pub struct SettingsStoreConfig {
    /// Path to the settings file
    pub settings_path: PathBuf,
    /// Path to backup directory
    pub backup_dir: PathBuf,
    /// Maximum number of backups to keep
    pub max_backups: usize,
    /// Whether to create default settings if the file does not exist
    pub create_default: bool,
}

impl SettingsStoreConfig {
    /// Store rooted at `dir`: `dir/settings.json` plus `dir/backups`
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            settings_path: dir.join("settings.json"),
            backup_dir: dir.join("backups"),
            max_backups: 5,
            create_default: true,
        }
    }

    /// Store for an explicit settings file, backups next to it
    pub fn for_file(path: impl Into<PathBuf>) -> Self {
        let settings_path = path.into();
        let backup_dir = settings_path
            .parent()
            .map(|p| p.join("backups"))
            .unwrap_or_else(|| PathBuf::from("backups"));
        Self {
            settings_path,
            backup_dir,
            max_backups: 5,
            create_default: true,
        }
    }
}

impl Default for SettingsStoreConfig {
    fn default() -> Self {
        let dir = directories::ProjectDirs::from("", "", "DocuSync")
            .map(|dirs| dirs.config_dir().to_path_buf())
            .or_else(|| dirs::config_dir().map(|d| d.join("DocuSync")))
            .unwrap_or_else(|| PathBuf::from("."));
        Self::in_dir(dir)
    }
}

/// Settings store with thread-safe access
pub struct SettingsStore {
    settings: Arc<RwLock<WatchdogSettings>>,
    options: SettingsStoreConfig,
}

impl SettingsStore {
    /// Open the store, loading or creating the settings file
    pub async fn new(options: SettingsStoreConfig) -> ConfigResult<Self> {
        if let Some(parent) = options.settings_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::create_dir_all(&options.backup_dir).await?;

        let settings = if tokio::fs::try_exists(&options.settings_path).await? {
            Self::load_from_file(&options.settings_path).await?
        } else if options.create_default {
            let defaults = WatchdogSettings::default();
            Self::save_to_file(&options.settings_path, &defaults).await?;
            tracing::info!("Created default settings at {:?}", options.settings_path);
            defaults
        } else {
            return Err(ConfigError::NotFound(options.settings_path.clone()));
        };

        Ok(Self {
            settings: Arc::new(RwLock::new(settings)),
            options,
        })
    }

    async fn load_from_file(path: &Path) -> ConfigResult<WatchdogSettings> {
        let content = tokio::fs::read_to_string(path).await?;
        let settings: WatchdogSettings = serde_json::from_str(&content)?;
        Ok(settings)
    }

    /// Save settings with an atomic write
    async fn save_to_file(path: &Path, settings: &WatchdogSettings) -> ConfigResult<()> {
        let content = serde_json::to_string_pretty(settings)?;

        let temp_path = path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, &content).await?;
        tokio::fs::rename(&temp_path, path).await?;

        Ok(())
    }

    /// Current settings (read-only copy)
    pub async fn get(&self) -> WatchdogSettings {
        self.settings.read().await.clone()
    }

    /// Apply `updater`, validate, stamp and persist
    pub async fn update<F>(&self, updater: F) -> ConfigResult<WatchdogSettings>
    where
        F: FnOnce(&mut WatchdogSettings),
    {
        let mut settings = self.settings.write().await;

        let mut updated = settings.clone();
        updater(&mut updated);
        updated.validate()?;

        self.create_backup(&settings).await?;
        updated.last_modified = chrono::Utc::now().to_rfc3339();
        Self::save_to_file(&self.options.settings_path, &updated).await?;

        *settings = updated;
        Ok(settings.clone())
    }

    /// Replace the whole document
    pub async fn set(&self, new_settings: WatchdogSettings) -> ConfigResult<()> {
        new_settings.validate()?;
        let mut settings = self.settings.write().await;

        self.create_backup(&settings).await?;

        *settings = new_settings;
        settings.last_modified = chrono::Utc::now().to_rfc3339();
        Self::save_to_file(&self.options.settings_path, &settings).await?;

        Ok(())
    }

    async fn create_backup(&self, settings: &WatchdogSettings) -> ConfigResult<()> {
        let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S%.3f");
        let backup_name = format!("settings_backup_{}.json", timestamp);
        let backup_path = self.options.backup_dir.join(backup_name);

        Self::save_to_file(&backup_path, settings).await?;
        self.cleanup_old_backups().await?;

        Ok(())
    }

    /// Remove old backups beyond `max_backups`
    async fn cleanup_old_backups(&self) -> ConfigResult<()> {
        let mut backups = self.list_backups().await?;

        while backups.len() > self.options.max_backups {
            let oldest = backups.remove(0);
            tokio::fs::remove_file(&oldest).await?;
        }

        Ok(())
    }

    /// Export settings to a file
    pub async fn export(&self, path: &Path) -> ConfigResult<()> {
        let settings = self.settings.read().await;
        Self::save_to_file(path, &settings).await
    }

    /// Import settings from a file
    pub async fn import(&self, path: &Path) -> ConfigResult<WatchdogSettings> {
        let imported = Self::load_from_file(path).await?;
        self.set(imported).await?;
        Ok(self.get().await)
    }

    /// Reset to default settings
    pub async fn reset(&self) -> ConfigResult<WatchdogSettings> {
        self.set(WatchdogSettings::default()).await?;
        Ok(self.get().await)
    }

    pub fn settings_path(&self) -> &Path {
        &self.options.settings_path
    }

    pub fn backup_dir(&self) -> &Path {
        &self.options.backup_dir
    }

    /// Available backups, oldest first
    pub async fn list_backups(&self) -> ConfigResult<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(&self.options.backup_dir).await?;
        let mut backups: Vec<PathBuf> = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                backups.push(path);
            }
        }

        // Names embed the timestamp
        backups.sort();
        Ok(backups)
    }

    pub async fn restore_backup(&self, backup_path: &Path) -> ConfigResult<WatchdogSettings> {
        self.import(backup_path).await
    }
}

// Convenience setters for the DocuSync sync section
impl SettingsStore {
    pub async fn set_excluded_folders(&self, folders: Vec<String>) -> ConfigResult<WatchdogSettings> {
        self.update(|settings| {
            settings.sync.excluded_folders = folders;
        })
        .await
    }

    pub async fn set_excluded_files(&self, files: Vec<String>) -> ConfigResult<WatchdogSettings> {
        self.update(|settings| {
            settings.sync.excluded_files = files;
        })
        .await
    }

    pub async fn set_dry_run(&self, dry_run: bool) -> ConfigResult<WatchdogSettings> {
        self.update(|settings| {
            settings.sync.dry_run = dry_run;
        })
        .await
    }
}
