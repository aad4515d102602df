//! Log rotation and retention
//!
//! `tracing-appender` rolls the active file over on the configured period;
//! `LogRotator` prunes old DocuSync log files by count and age.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing_appender::rolling::Rotation;

use super::LoggingError;

/// Log rotation strategy
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RotationStrategy {
    /// Start a new file every day, as the DocuSync logger did
    #[default]
    Daily,
    Hourly,
    /// Single file, never rolled over
    Never,
}

impl RotationStrategy {
    pub fn to_rotation(self) -> Rotation {
        match self {
            RotationStrategy::Daily => Rotation::DAILY,
            RotationStrategy::Hourly => Rotation::HOURLY,
            RotationStrategy::Never => Rotation::NEVER,
        }
    }
}

/// Log rotation configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RotationConfig {
    #[serde(default)]
    pub strategy: RotationStrategy,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_files")]
    pub max_files: usize,

    /// Maximum age of log files in days
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u32,
}

fn default_max_files() -> usize {
    7
}

fn default_max_age_days() -> u32 {
    30
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            strategy: RotationStrategy::Daily,
            max_files: default_max_files(),
            max_age_days: default_max_age_days(),
        }
    }
}

impl RotationConfig {
    pub fn production() -> Self {
        Self {
            strategy: RotationStrategy::Daily,
            max_files: 14,
            max_age_days: 30,
        }
    }

    pub fn development() -> Self {
        Self {
            strategy: RotationStrategy::Never,
            max_files: 3,
            max_age_days: 7,
        }
    }
}

/// Log file information
#[derive(Debug, Clone)]
pub struct LogFileInfo {
    pub path: PathBuf,
    pub modified: DateTime<Utc>,
}

/// Prunes log files written with a given prefix
pub struct LogRotator {
    config: RotationConfig,
    prefix: String,
    last_rotation: Option<DateTime<Utc>>,
}

impl LogRotator {
    pub fn new(config: RotationConfig, prefix: impl Into<String>) -> Self {
        Self {
            config,
            prefix: prefix.into(),
            last_rotation: None,
        }
    }

    /// Apply the retention policy to `log_dir`. Returns the number of files
    /// removed.
    pub fn rotate(&mut self, log_dir: &Path) -> Result<usize, LoggingError> {
        if !log_dir.exists() {
            return Ok(0);
        }

        let files = self.log_files(log_dir)?;
        let mut removed = self.cleanup_by_age(&files)?;

        let remaining: Vec<&LogFileInfo> = files.iter().filter(|f| f.path.exists()).collect();
        if remaining.len() > self.config.max_files {
            let excess = remaining.len() - self.config.max_files;
            for file in remaining.iter().take(excess) {
                tracing::debug!("Removing old log file: {:?}", file.path);
                fs::remove_file(&file.path)?;
                removed += 1;
            }
        }

        self.last_rotation = Some(Utc::now());
        Ok(removed)
    }

    /// Files carrying our prefix, oldest first
    fn log_files(&self, log_dir: &Path) -> Result<Vec<LogFileInfo>, LoggingError> {
        let mut files = Vec::new();

        for entry in fs::read_dir(log_dir)?.flatten() {
            let path = entry.path();
            let ours = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(&self.prefix))
                .unwrap_or(false);
            if !ours || !path.is_file() {
                continue;
            }
            if let Ok(metadata) = fs::metadata(&path) {
                let modified = metadata
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now());
                files.push(LogFileInfo { path, modified });
            }
        }

        files.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.path.cmp(&b.path)));
        Ok(files)
    }

    fn cleanup_by_age(&self, files: &[LogFileInfo]) -> Result<usize, LoggingError> {
        let cutoff = Utc::now() - Duration::days(i64::from(self.config.max_age_days));
        let mut removed = 0;

        for file in files.iter().filter(|f| f.modified < cutoff) {
            tracing::debug!("Removing expired log file: {:?}", file.path);
            fs::remove_file(&file.path)?;
            removed += 1;
        }
        Ok(removed)
    }

    pub fn last_rotation(&self) -> Option<DateTime<Utc>> {
        self.last_rotation
    }

    pub fn config(&self) -> &RotationConfig {
        &self.config
    }
}
