//! Monitored process handles
//!
//! The supervisor and the monitor only ever see a `MonitoredProcess`: it can
//! report whether the child has exited and terminate it. Both activities
//! share one handle, so every operation is serialised on the child lock.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::supervisor::WatchdogError;

/// How a monitored process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    /// Exit code, `None` when the process was ended by a signal
    pub code: Option<i32>,
    /// Whether the watchdog terminated the process
    pub forced: bool,
}

impl ExitInfo {
    pub fn exited(code: i32) -> Self {
        Self {
            code: Some(code),
            forced: false,
        }
    }

    pub fn killed(code: Option<i32>) -> Self {
        Self { code, forced: true }
    }

    pub fn from_status(status: ExitStatus, forced: bool) -> Self {
        Self {
            code: status.code(),
            forced,
        }
    }

    /// A voluntary exit with code 0
    pub fn is_clean(&self) -> bool {
        !self.forced && self.code == Some(0)
    }
}

impl fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{}", code)?,
            None => write!(f, "signal")?,
        }
        if self.forced {
            write!(f, ", killed by watchdog")?;
        }
        Ok(())
    }
}

/// Result of asking a process to terminate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The kill was issued
    Killed,
    /// The process had already exited; nothing was killed
    AlreadyExited(ExitInfo),
}

/// Handle to a running child shared by the exit watcher and the monitor
pub trait MonitoredProcess: Send + Sync {
    /// OS process id
    fn id(&self) -> u32;

    /// Non-blocking exit check
    fn exit_info(&self) -> io::Result<Option<ExitInfo>>;

    /// Kill the process unless it has already exited. The process is marked
    /// as force-terminated before the kill is issued, so any later exit
    /// observation reports `forced == true`.
    fn terminate(&self) -> io::Result<Termination>;

    /// Block until the process has exited and been reaped
    fn wait(&self) -> io::Result<ExitInfo>;
}

/// `MonitoredProcess` backed by `std::process::Child`
pub struct ChildProcess {
    id: u32,
    child: Mutex<Child>,
    forced: AtomicBool,
}

impl ChildProcess {
    pub fn new(child: Child) -> Self {
        Self {
            id: child.id(),
            child: Mutex::new(child),
            forced: AtomicBool::new(false),
        }
    }

    fn info(&self, status: ExitStatus) -> ExitInfo {
        ExitInfo::from_status(status, self.forced.load(Ordering::SeqCst))
    }

    /// Classify the status observed right after a kill. A successful status
    /// cannot come from the kill (a signal on Unix, exit code 1 on Windows),
    /// so the child finished cleanly on its own and is not a hang.
    fn settle_kill(&self, status: Option<ExitStatus>) -> Termination {
        match status {
            Some(status) if status.success() => {
                self.forced.store(false, Ordering::SeqCst);
                Termination::AlreadyExited(self.info(status))
            }
            _ => Termination::Killed,
        }
    }
}

impl MonitoredProcess for ChildProcess {
    fn id(&self) -> u32 {
        self.id
    }

    fn exit_info(&self) -> io::Result<Option<ExitInfo>> {
        let mut child = self.child.lock();
        Ok(child.try_wait()?.map(|status| self.info(status)))
    }

    fn terminate(&self) -> io::Result<Termination> {
        let mut child = self.child.lock();
        if let Some(status) = child.try_wait()? {
            return Ok(Termination::AlreadyExited(self.info(status)));
        }

        self.forced.store(true, Ordering::SeqCst);
        if let Err(e) = child.kill() {
            self.forced.store(false, Ordering::SeqCst);
            return Err(e);
        }

        // The child may have exited on its own just before the kill landed
        let status = child.try_wait()?;
        Ok(self.settle_kill(status))
    }

    fn wait(&self) -> io::Result<ExitInfo> {
        let mut child = self.child.lock();
        let status = child.wait()?;
        Ok(self.info(status))
    }
}

impl fmt::Debug for ChildProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildProcess")
            .field("id", &self.id)
            .field("forced", &self.forced.load(Ordering::SeqCst))
            .finish()
    }
}

/// Starts one instance of the monitored application
pub trait ProcessLauncher: Send + Sync {
    fn launch(&self) -> Result<Arc<dyn MonitoredProcess>, WatchdogError>;

    /// Human-readable name for logs
    fn describe(&self) -> String;
}

/// Launches a named executable directly: no shell, inherited environment
/// and standard streams.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    pub executable: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl CommandLauncher {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

impl ProcessLauncher for CommandLauncher {
    fn launch(&self) -> Result<Arc<dyn MonitoredProcess>, WatchdogError> {
        let mut command = Command::new(&self.executable);
        command.args(&self.args);
        if let Some(ref dir) = self.working_dir {
            command.current_dir(dir);
        }

        let child = command.spawn().map_err(|source| WatchdogError::ProcessLaunch {
            executable: self.executable.clone(),
            source,
        })?;

        tracing::info!("Launched {:?} (PID: {})", self.executable, child.id());
        Ok(Arc::new(ChildProcess::new(child)))
    }

    fn describe(&self) -> String {
        self.executable.display().to_string()
    }
}
