//! Folder mirroring through robocopy
//!
//! DocuSync moves finished folders from the local documents tree to the
//! remote share with robocopy. This module builds the argument list from the
//! sync settings, runs the tool without a console window and classifies its
//! exit code.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::process::Command;

use crate::config::SyncSettings;

/// Highest robocopy exit code that still means success. Codes 0-7 report
/// combinations of copied, extra and mismatched files; 8 and up are failures.
pub const MAX_SUCCESS_CODE: i32 = 7;

/// Base options: move files and delete the source, include empty folders,
/// no per-file or per-directory listing, two retries two seconds apart.
pub const MOVE_OPTIONS: [&str; 6] = ["/MOVE", "/E", "/NFL", "/NDL", "/W:2", "/R:2"];

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("Failed to run {tool:?}: {source}")]
    Launch {
        tool: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Robocopy failed (code {code}): {stderr}")]
    Failed { code: i32, stderr: String },

    #[error("{0} path is not configured")]
    MissingPath(&'static str),
}

/// Captured result of one robocopy run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RobocopyResult {
    /// `-1` when the tool was killed by a signal
    pub exit_code: i32,
    pub output: String,
    pub error: String,
}

impl RobocopyResult {
    pub fn success(&self) -> bool {
        (0..=MAX_SUCCESS_CODE).contains(&self.exit_code)
    }
}

/// Exclusions and flags for a move
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MirrorOptions {
    pub excluded_files: Vec<String>,
    pub excluded_folders: Vec<String>,
    /// List only (`/L`), touch nothing
    pub dry_run: bool,
}

impl From<&SyncSettings> for MirrorOptions {
    fn from(sync: &SyncSettings) -> Self {
        Self {
            excluded_files: sync.excluded_files.clone(),
            excluded_folders: sync.excluded_folders.clone(),
            dry_run: sync.dry_run,
        }
    }
}

/// Argument list for moving `source` into `destination`.
///
/// Arguments are passed to the tool directly, so names with spaces need no
/// quoting.
pub fn move_args(source: &Path, destination: &Path, options: &MirrorOptions) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![source.into(), destination.into()];
    args.extend(MOVE_OPTIONS.iter().map(OsString::from));

    if !options.excluded_files.is_empty() {
        args.push("/XF".into());
        args.extend(options.excluded_files.iter().map(OsString::from));
    }
    if !options.excluded_folders.is_empty() {
        args.push("/XD".into());
        args.extend(options.excluded_folders.iter().map(OsString::from));
    }
    if options.dry_run {
        args.push("/L".into());
    }
    args
}

/// Runs robocopy (or a compatible tool)
#[derive(Debug, Clone)]
pub struct Mirror {
    tool: PathBuf,
}

impl Default for Mirror {
    fn default() -> Self {
        Self::new()
    }
}

impl Mirror {
    pub fn new() -> Self {
        Self::with_tool("robocopy")
    }

    pub fn with_tool(tool: impl Into<PathBuf>) -> Self {
        Self { tool: tool.into() }
    }

    pub fn tool(&self) -> &Path {
        &self.tool
    }

    /// Run the tool with `args`, capturing stdout and stderr
    pub async fn run(&self, args: &[OsString]) -> Result<RobocopyResult, MirrorError> {
        let mut cmd = Command::new(&self.tool);
        cmd.args(args).kill_on_drop(true);

        #[cfg(windows)]
        {
            const CREATE_NO_WINDOW: u32 = 0x08000000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        let output = cmd.output().await.map_err(|source| MirrorError::Launch {
            tool: self.tool.clone(),
            source,
        })?;

        Ok(RobocopyResult {
            exit_code: output.status.code().unwrap_or(-1),
            output: String::from_utf8_lossy(&output.stdout).into_owned(),
            error: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Move `local_path` into the configured remote folder
    pub async fn move_folder_to_remote(
        &self,
        local_path: &Path,
        sync: &SyncSettings,
    ) -> Result<RobocopyResult, MirrorError> {
        if sync.remote_path.trim().is_empty() {
            return Err(MirrorError::MissingPath("Remote"));
        }
        let remote_path = sync.remote_path();
        let args = move_args(local_path, &remote_path, &MirrorOptions::from(sync));

        tracing::debug!("Running {:?} with {:?}", self.tool, args);
        let result = self.run(&args).await?;

        if !result.success() {
            tracing::error!("Robocopy failed (code {}):\n{}", result.exit_code, result.error);
            return Err(MirrorError::Failed {
                code: result.exit_code,
                stderr: result.error,
            });
        }

        tracing::info!("Successfully moved folder to: {}", remote_path.display());
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn test_move_args_base_options() {
        let args = move_args(Path::new("C:/Docs/Done"), Path::new("D:/Share"), &MirrorOptions::default());
        assert_eq!(
            strings(&args),
            vec!["C:/Docs/Done", "D:/Share", "/MOVE", "/E", "/NFL", "/NDL", "/W:2", "/R:2"]
        );
    }

    #[test]
    fn test_move_args_exclusions_and_dry_run() {
        let options = MirrorOptions {
            excluded_files: vec!["desktop.ini".into(), "Thumbs.db".into()],
            excluded_folders: vec!["My Music".into()],
            dry_run: true,
        };
        let args = strings(&move_args(Path::new("a"), Path::new("b"), &options));

        let xf = args.iter().position(|a| a == "/XF").unwrap();
        assert_eq!(args[xf + 1..xf + 3], ["desktop.ini", "Thumbs.db"]);
        let xd = args.iter().position(|a| a == "/XD").unwrap();
        assert_eq!(args[xd + 1], "My Music");
        assert_eq!(args.last().map(String::as_str), Some("/L"));
    }

    #[test]
    fn test_exit_code_classification() {
        let result = |exit_code| RobocopyResult {
            exit_code,
            output: String::new(),
            error: String::new(),
        };
        assert!(result(0).success());
        assert!(result(7).success());
        assert!(!result(8).success());
        assert!(!result(16).success());
        assert!(!result(-1).success());
    }

    #[tokio::test]
    async fn test_missing_remote_path_is_rejected() {
        let sync = SyncSettings::default();
        let result = Mirror::new().move_folder_to_remote(Path::new("."), &sync).await;
        assert!(matches!(result, Err(MirrorError::MissingPath("Remote"))));
    }

    #[tokio::test]
    async fn test_missing_tool_fails_to_launch() {
        let mirror = Mirror::with_tool("/definitely/not/here/robocopy");
        let result = mirror.run(&[]).await;
        assert!(matches!(result, Err(MirrorError::Launch { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failure_code_carries_stderr() {
        let sync = SyncSettings {
            remote_path: "/tmp/docusync-remote".into(),
            ..SyncSettings::default()
        };
        // The "source" is a script that fails like robocopy does
        let temp = tempfile::TempDir::new().unwrap();
        let script = temp.path().join("fake-robocopy.sh");
        std::fs::write(&script, "echo 'ERROR 53: network path not found' >&2\nexit 9\n").unwrap();

        let mirror = Mirror::with_tool("sh");
        let result = mirror.move_folder_to_remote(&script, &sync).await;

        match result {
            Err(MirrorError::Failed { code, stderr }) => {
                assert_eq!(code, 9);
                assert!(stderr.contains("ERROR 53"));
            }
            other => panic!("expected Failed, got {:?}", other),
        }
    }
}
