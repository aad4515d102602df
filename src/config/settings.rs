//! Watchdog and DocuSync settings document
//!
//! Every field carries a serde default, so a partial or older settings file
//! still loads and missing values take their documented defaults.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::logging::LoggingConfig;
use crate::watchdog::{MonitorConfig, RestartPolicy, SupervisorConfig, CHANNEL_NAME, CHANNEL_SIZE};

use super::storage::{ConfigError, ConfigResult};

/// Complete settings document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchdogSettings {
    #[serde(default)]
    pub child: ChildSettings,

    #[serde(default)]
    pub heartbeat: HeartbeatSettings,

    #[serde(default)]
    pub restart: RestartSettings,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Last modified timestamp
    #[serde(default = "default_timestamp")]
    pub last_modified: String,
}

fn default_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

impl Default for WatchdogSettings {
    fn default() -> Self {
        Self {
            child: ChildSettings::default(),
            heartbeat: HeartbeatSettings::default(),
            restart: RestartSettings::default(),
            sync: SyncSettings::default(),
            logging: LoggingConfig::default(),
            last_modified: default_timestamp(),
        }
    }
}

impl WatchdogSettings {
    /// Reject settings the supervisor cannot run with
    pub fn validate(&self) -> ConfigResult<()> {
        if self.child.executable.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("child.executable is empty".to_string()));
        }
        if self.heartbeat.channel_name.is_empty() {
            return Err(ConfigError::Invalid("heartbeat.channel_name is empty".to_string()));
        }
        if self.heartbeat.channel_size < std::mem::size_of::<i64>() {
            return Err(ConfigError::Invalid(format!(
                "heartbeat.channel_size must be at least 8 bytes, got {}",
                self.heartbeat.channel_size
            )));
        }
        if self.heartbeat.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("heartbeat.poll_interval_ms must be positive".to_string()));
        }
        if self.heartbeat.timeout_ms == 0 {
            return Err(ConfigError::Invalid("heartbeat.timeout_ms must be positive".to_string()));
        }
        if self.heartbeat.max_hang_count == 0 {
            return Err(ConfigError::Invalid("heartbeat.max_hang_count must be positive".to_string()));
        }
        if self.heartbeat.exit_poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "heartbeat.exit_poll_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// The monitored application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildSettings {
    #[serde(default = "default_executable")]
    pub executable: PathBuf,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

fn default_executable() -> PathBuf {
    if cfg!(windows) {
        PathBuf::from("DocuSync.exe")
    } else {
        PathBuf::from("docusync")
    }
}

impl Default for ChildSettings {
    fn default() -> Self {
        Self {
            executable: default_executable(),
            args: Vec::new(),
            working_dir: None,
        }
    }
}

/// Heartbeat channel and monitor timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatSettings {
    #[serde(default = "default_channel_name")]
    pub channel_name: String,

    #[serde(default = "default_channel_size")]
    pub channel_size: usize,

    /// Writer period used by the monitored application
    #[serde(default = "default_beat_interval")]
    pub beat_interval_ms: u64,

    #[serde(default = "default_grace_period")]
    pub grace_period_ms: u64,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,

    #[serde(default = "default_max_hang_count")]
    pub max_hang_count: u32,

    #[serde(default = "default_exit_poll_interval")]
    pub exit_poll_interval_ms: u64,
}

fn default_channel_name() -> String {
    CHANNEL_NAME.to_string()
}

fn default_channel_size() -> usize {
    CHANNEL_SIZE
}

fn default_beat_interval() -> u64 {
    5000
}

fn default_grace_period() -> u64 {
    10_000
}

fn default_poll_interval() -> u64 {
    5000
}

fn default_timeout() -> u64 {
    5000
}

fn default_max_hang_count() -> u32 {
    4
}

fn default_exit_poll_interval() -> u64 {
    250
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            channel_name: default_channel_name(),
            channel_size: default_channel_size(),
            beat_interval_ms: default_beat_interval(),
            grace_period_ms: default_grace_period(),
            poll_interval_ms: default_poll_interval(),
            timeout_ms: default_timeout(),
            max_hang_count: default_max_hang_count(),
            exit_poll_interval_ms: default_exit_poll_interval(),
        }
    }
}

impl From<&HeartbeatSettings> for MonitorConfig {
    fn from(settings: &HeartbeatSettings) -> Self {
        Self {
            channel_name: settings.channel_name.clone(),
            channel_size: settings.channel_size,
            grace_period: Duration::from_millis(settings.grace_period_ms),
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
            timeout: Duration::from_millis(settings.timeout_ms),
            max_hang_count: settings.max_hang_count,
        }
    }
}

impl From<&WatchdogSettings> for SupervisorConfig {
    fn from(settings: &WatchdogSettings) -> Self {
        Self {
            monitor: MonitorConfig::from(&settings.heartbeat),
            exit_poll_interval: Duration::from_millis(settings.heartbeat.exit_poll_interval_ms),
            restart_delay: Duration::from_millis(settings.restart.restart_delay_ms),
        }
    }
}

/// What to do after a crash or a hang
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartSettings {
    #[serde(default)]
    pub policy: RestartPolicy,

    /// Cap on consecutive restarts, unlimited when absent
    #[serde(default)]
    pub max_restarts: Option<u32>,

    #[serde(default = "default_restart_delay")]
    pub restart_delay_ms: u64,
}

fn default_restart_delay() -> u64 {
    2000
}

impl Default for RestartSettings {
    fn default() -> Self {
        Self {
            policy: RestartPolicy::default(),
            max_restarts: None,
            restart_delay_ms: default_restart_delay(),
        }
    }
}

/// DocuSync application settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SyncSettings {
    /// Local folder, may reference environment variables
    #[serde(default)]
    pub local_path: String,

    /// Remote folder, may reference environment variables
    #[serde(default)]
    pub remote_path: String,

    #[serde(default)]
    pub excluded_folders: Vec<String>,

    #[serde(default)]
    pub excluded_files: Vec<String>,

    #[serde(default)]
    pub dry_run: bool,

    #[serde(default)]
    pub prompt_on_conflict: bool,

    #[serde(default)]
    pub start_minimized: bool,
}

impl SyncSettings {
    /// Local folder with environment variables expanded
    pub fn local_path(&self) -> PathBuf {
        PathBuf::from(expand_env_vars(&self.local_path))
    }

    /// Remote folder with environment variables expanded
    pub fn remote_path(&self) -> PathBuf {
        PathBuf::from(expand_env_vars(&self.remote_path))
    }

    pub fn absolute_local_path(&self, relative: impl AsRef<Path>) -> PathBuf {
        normalize(&self.local_path().join(relative))
    }

    pub fn relative_local_path(&self, full: impl AsRef<Path>) -> String {
        relative_to(&self.local_path(), full.as_ref())
    }

    pub fn absolute_remote_path(&self, relative: impl AsRef<Path>) -> PathBuf {
        normalize(&self.remote_path().join(relative))
    }

    pub fn relative_remote_path(&self, full: impl AsRef<Path>) -> String {
        relative_to(&self.remote_path(), full.as_ref())
    }
}

lazy_static::lazy_static! {
    static ref ENV_VAR: Option<Regex> = Regex::new(
        r"%([A-Za-z_][A-Za-z0-9_()]*)%|\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)"
    )
    .ok();
}

/// Expand `%VAR%`, `${VAR}` and `$VAR`. Unknown variables are left as
/// written.
pub fn expand_env_vars(input: &str) -> String {
    let Some(pattern) = ENV_VAR.as_ref() else {
        return input.to_string();
    };
    pattern
        .replace_all(input, |caps: &Captures| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .or_else(|| caps.get(3))
                .map(|m| m.as_str())
                .unwrap_or_default();
            std::env::var(name).unwrap_or_else(|_| caps[0].to_string())
        })
        .into_owned()
}

/// Lexically resolve `.` and `..` without touching the filesystem
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// `full` relative to `base`, with `/` separators
fn relative_to(base: &Path, full: &Path) -> String {
    let base = normalize(base);
    let full = normalize(full);
    let base_parts: Vec<Component> = base.components().collect();
    let full_parts: Vec<Component> = full.components().collect();

    let common = base_parts
        .iter()
        .zip(full_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut parts: Vec<String> = Vec::new();
    parts.extend(std::iter::repeat("..".to_string()).take(base_parts.len() - common));
    parts.extend(
        full_parts[common..]
            .iter()
            .map(|c| c.as_os_str().to_string_lossy().into_owned()),
    );

    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/").replace('\\', "/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_docusync() {
        let settings = WatchdogSettings::default();
        assert_eq!(settings.heartbeat.channel_name, "DocuSyncHeartBeat");
        assert_eq!(settings.heartbeat.channel_size, 1024);
        assert_eq!(settings.heartbeat.grace_period_ms, 10_000);
        assert_eq!(settings.heartbeat.max_hang_count, 4);
        assert_eq!(settings.restart.policy, RestartPolicy::Prompt);
        assert_eq!(settings.restart.restart_delay_ms, 2000);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_document_takes_defaults() {
        let settings: WatchdogSettings =
            serde_json::from_str(r#"{"heartbeat": {"timeout_ms": 1500}, "restart": {"policy": "always"}}"#)
                .unwrap();
        assert_eq!(settings.heartbeat.timeout_ms, 1500);
        assert_eq!(settings.heartbeat.poll_interval_ms, 5000);
        assert_eq!(settings.restart.policy, RestartPolicy::Always);
        assert_eq!(settings.child, ChildSettings::default());
    }

    #[test]
    fn test_validate_rejects_unusable_values() {
        let mut settings = WatchdogSettings::default();
        settings.heartbeat.max_hang_count = 0;
        assert!(matches!(settings.validate(), Err(ConfigError::Invalid(_))));

        let mut settings = WatchdogSettings::default();
        settings.child.executable = PathBuf::new();
        assert!(settings.validate().is_err());

        let mut settings = WatchdogSettings::default();
        settings.heartbeat.channel_size = 4;
        assert!(settings.validate().is_err());

        let mut settings = WatchdogSettings::default();
        settings.heartbeat.poll_interval_ms = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_monitor_config_conversion() {
        let mut settings = WatchdogSettings::default();
        settings.heartbeat.poll_interval_ms = 1200;
        settings.restart.restart_delay_ms = 0;

        let config = SupervisorConfig::from(&settings);
        assert_eq!(config.monitor.poll_interval, Duration::from_millis(1200));
        assert_eq!(config.monitor.grace_period, Duration::from_secs(10));
        assert_eq!(config.exit_poll_interval, Duration::from_millis(250));
        assert_eq!(config.restart_delay, Duration::ZERO);
    }

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("DOCUSYNC_TEST_ROOT", "/srv/docs");
        assert_eq!(expand_env_vars("%DOCUSYNC_TEST_ROOT%/a"), "/srv/docs/a");
        assert_eq!(expand_env_vars("${DOCUSYNC_TEST_ROOT}/b"), "/srv/docs/b");
        assert_eq!(expand_env_vars("$DOCUSYNC_TEST_ROOT/c"), "/srv/docs/c");
        assert_eq!(
            expand_env_vars("%DOCUSYNC_TEST_UNSET_VAR%/d"),
            "%DOCUSYNC_TEST_UNSET_VAR%/d"
        );
        assert_eq!(expand_env_vars("plain"), "plain");
    }

    #[cfg(unix)]
    #[test]
    fn test_path_helpers_normalise() {
        let sync = SyncSettings {
            local_path: "/home/user/Documents".to_string(),
            remote_path: "/mnt/share/docs".to_string(),
            ..SyncSettings::default()
        };

        assert_eq!(
            sync.absolute_local_path("reports/../taxes/2024.pdf"),
            PathBuf::from("/home/user/Documents/taxes/2024.pdf")
        );
        assert_eq!(
            sync.relative_local_path("/home/user/Documents/taxes/2024.pdf"),
            "taxes/2024.pdf"
        );
        assert_eq!(sync.relative_remote_path("/mnt/share/other"), "../other");
        assert_eq!(sync.relative_remote_path("/mnt/share/docs"), ".");
    }
}
