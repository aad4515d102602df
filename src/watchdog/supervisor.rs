//! Watchdog Supervisor Module
//!
//! Launches the DocuSync application, watches it with a heartbeat monitor
//! and an exit watcher, and relaunches it after a crash or a hang when the
//! restart decider agrees.
//!
//! Each launch gets its own `SupervisionSession`. The exit watcher runs on a
//! named thread whose handle is joined before the session is disposed, so
//! nothing outlives the iteration that created it.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use super::channel::ChannelError;
use super::monitor::{HeartbeatMonitor, MonitorConfig};
use super::process::{ExitInfo, ProcessLauncher};
use super::restart::RestartDecider;
use super::session::{SupervisionSession, Verdict};

/// Supervisor exit code: clean stop, declined restart or interrupt
pub const EXIT_OK: i32 = 0;
/// Supervisor exit code: unrecovered internal failure
pub const EXIT_FAILURE: i32 = 1;
/// Supervisor exit code: the application could not be launched
pub const EXIT_LAUNCH_FAILED: i32 = 2;
/// Supervisor exit code: invalid configuration or usage
pub const EXIT_CONFIG: i32 = 3;

/// Watchdog errors
#[derive(Error, Debug)]
pub enum WatchdogError {
    #[error("Failed to launch {executable:?}: {source}")]
    ProcessLaunch {
        executable: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Child process {pid} is still running")]
    ChildAlreadyRunning { pid: u32 },

    #[error("Heartbeat channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Exit watcher thread panicked")]
    WatcherPanicked,
}

/// Supervisor timing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    pub monitor: MonitorConfig,
    /// How often the exit watcher checks the child
    pub exit_poll_interval: Duration,
    /// Pause between a failed session and the next launch
    pub restart_delay: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            monitor: MonitorConfig::default(),
            exit_poll_interval: Duration::from_millis(250),
            restart_delay: Duration::from_secs(2),
        }
    }
}

/// Why the supervisor stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The application exited with code 0
    CleanExit,
    /// The application crashed or hung and no restart was granted
    RestartDeclined(Verdict),
    /// Shutdown was requested; the application was left running
    Interrupted,
    /// The application could not be launched
    LaunchFailed(String),
    /// The supervisor itself failed
    Failed(String),
}

impl StopReason {
    pub fn exit_code(&self) -> i32 {
        match self {
            StopReason::CleanExit | StopReason::RestartDeclined(_) | StopReason::Interrupted => {
                EXIT_OK
            }
            StopReason::LaunchFailed(_) => EXIT_LAUNCH_FAILED,
            StopReason::Failed(_) => EXIT_FAILURE,
        }
    }
}

#[derive(Default)]
struct ShutdownState {
    requested: Mutex<bool>,
    signalled: Condvar,
    current: Mutex<Option<SupervisionSession>>,
}

impl ShutdownState {
    fn is_requested(&self) -> bool {
        *self.requested.lock()
    }

    /// Sleep up to `timeout`; true when shutdown was requested meanwhile
    fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut requested = self.requested.lock();
        while !*requested {
            if self.signalled.wait_until(&mut requested, deadline).timed_out() {
                break;
            }
        }
        *requested
    }
}

/// Requests a graceful stop from another thread, e.g. a Ctrl-C handler
#[derive(Clone)]
pub struct ShutdownHandle {
    state: Arc<ShutdownState>,
}

impl ShutdownHandle {
    /// Resolve the running session as interrupted and stop the loop. The
    /// application itself is not touched.
    pub fn request(&self) {
        {
            let mut requested = self.state.requested.lock();
            *requested = true;
            self.state.signalled.notify_all();
        }
        if let Some(session) = self.state.current.lock().as_ref() {
            session.outcome().decide(Verdict::Interrupted);
        }
        tracing::info!("Watchdog shutdown requested");
    }

    pub fn is_requested(&self) -> bool {
        self.state.is_requested()
    }
}

/// Watchdog supervisor
pub struct Supervisor {
    launcher: Box<dyn ProcessLauncher>,
    decider: Box<dyn RestartDecider>,
    config: SupervisorConfig,
    shutdown: Arc<ShutdownState>,
    iteration: u32,
}

impl Supervisor {
    pub fn new(
        launcher: Box<dyn ProcessLauncher>,
        decider: Box<dyn RestartDecider>,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            launcher,
            decider,
            config,
            shutdown: Arc::new(ShutdownState::default()),
            iteration: 0,
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Number of launches so far
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            state: Arc::clone(&self.shutdown),
        }
    }

    /// Supervise until a clean exit, a declined restart, an interrupt or a
    /// failure. Errors end the loop; the watchdog never restarts itself.
    pub fn run(&mut self) -> StopReason {
        tracing::info!("Watchdog supervising {}", self.launcher.describe());

        let reason = match self.supervise() {
            Ok(reason) => reason,
            Err(e) => {
                let mut chain = e.to_string();
                let mut source = std::error::Error::source(&e);
                while let Some(cause) = source {
                    chain.push_str(": ");
                    chain.push_str(&cause.to_string());
                    source = cause.source();
                }
                tracing::error!(error = ?e, "Watchdog failed: {}", chain);

                match e {
                    WatchdogError::ProcessLaunch { .. } => StopReason::LaunchFailed(chain),
                    _ => StopReason::Failed(chain),
                }
            }
        };

        self.shutdown.current.lock().take();
        tracing::info!(
            "Watchdog stopped: {:?} (exit code {})",
            reason,
            reason.exit_code()
        );
        reason
    }

    fn supervise(&mut self) -> Result<StopReason, WatchdogError> {
        loop {
            if self.shutdown.is_requested() {
                return Ok(StopReason::Interrupted);
            }

            let session = self.launch_child()?;
            let verdict = self.supervise_session(&session)?;
            let exit = self.dispose(&session, verdict)?;

            let exit = match (verdict, exit) {
                (Verdict::CleanExit, _) => {
                    tracing::info!("DocuSync exited cleanly, watchdog stopping");
                    return Ok(StopReason::CleanExit);
                }
                (Verdict::Interrupted, _) => {
                    tracing::info!(
                        "Supervision interrupted, leaving DocuSync (PID: {}) running",
                        session.process().id()
                    );
                    return Ok(StopReason::Interrupted);
                }
                (_, Some(exit)) => exit,
                (_, None) => ExitInfo::killed(None),
            };

            if !self.decide_restart(&exit) {
                return Ok(StopReason::RestartDeclined(verdict));
            }

            if !self.config.restart_delay.is_zero() {
                tracing::info!(
                    "Restarting DocuSync in {}ms...",
                    self.config.restart_delay.as_millis()
                );
                if self.shutdown.wait_timeout(self.config.restart_delay) {
                    return Ok(StopReason::Interrupted);
                }
            }
        }
    }

    /// Start a new instance of the application. Fails if the previous
    /// instance is still running.
    pub fn launch_child(&mut self) -> Result<SupervisionSession, WatchdogError> {
        if let Some(previous) = self.shutdown.current.lock().as_ref() {
            if previous.process().exit_info()?.is_none() {
                return Err(WatchdogError::ChildAlreadyRunning {
                    pid: previous.process().id(),
                });
            }
        }

        let process = self.launcher.launch()?;
        self.iteration += 1;
        let session = SupervisionSession::new(self.iteration, process);
        tracing::info!(
            "Started DocuSync (PID: {}, launch #{})",
            session.process().id(),
            self.iteration
        );

        *self.shutdown.current.lock() = Some(session.clone());
        // A request that raced the launch still resolves this session
        if self.shutdown.is_requested() {
            session.outcome().decide(Verdict::Interrupted);
        }
        Ok(session)
    }

    /// Ask the restart decider whether to relaunch after `exit`
    pub fn decide_restart(&self, exit: &ExitInfo) -> bool {
        tracing::info!("DocuSync exited (code {}), asking whether to restart", exit);
        let restart = self.decider.confirm_restart(exit);
        if restart {
            tracing::info!("Restart granted");
        } else {
            tracing::info!("Restart declined, watchdog stopping");
        }
        restart
    }

    /// Run the exit watcher and a fresh monitor against `session` until a
    /// verdict exists, then join the watcher.
    fn supervise_session(&self, session: &SupervisionSession) -> Result<Verdict, WatchdogError> {
        let stop_watcher = Arc::new(AtomicBool::new(false));
        let watcher = spawn_exit_watcher(
            session.clone(),
            self.config.exit_poll_interval,
            Arc::clone(&stop_watcher),
        )?;

        let monitored = if session.outcome().is_decided() {
            tracing::debug!("Session resolved before monitoring began");
            Ok(None)
        } else {
            let mut monitor = HeartbeatMonitor::new(self.config.monitor.clone());
            let result = monitor.start(session);
            if monitor.fresh_polls() > 0 {
                self.decider.reset();
            }
            result
        };

        let verdict = match monitored {
            Ok(Some(verdict)) => Ok(verdict),
            Ok(None) => Ok(session.outcome().wait()),
            Err(e) => Err(e),
        };

        stop_watcher.store(true, Ordering::SeqCst);
        watcher.join().map_err(|_| WatchdogError::WatcherPanicked)?;

        let verdict = verdict?;
        tracing::info!("Session #{} ended: {}", session.iteration(), verdict);
        Ok(verdict)
    }

    /// Release the finished session. Hung processes are reaped here; an
    /// interrupted session keeps its process.
    fn dispose(
        &self,
        session: &SupervisionSession,
        verdict: Verdict,
    ) -> Result<Option<ExitInfo>, WatchdogError> {
        let exit = match verdict {
            Verdict::Interrupted => None,
            Verdict::Hung => Some(session.process().wait()?),
            Verdict::CleanExit | Verdict::Crashed(_) => session.process().exit_info()?,
        };
        if verdict != Verdict::Interrupted {
            self.shutdown.current.lock().take();
        }
        Ok(exit)
    }
}

/// Poll the child for exit until the session is decided or `stop` is set
fn spawn_exit_watcher(
    session: SupervisionSession,
    interval: Duration,
    stop: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("exit-watcher".to_string())
        .spawn(move || {
            let outcome = session.outcome();
            while !stop.load(Ordering::SeqCst) && !outcome.is_decided() {
                match session.process().exit_info() {
                    Ok(Some(info)) => {
                        if outcome.decide(Verdict::from_exit(info)) {
                            tracing::info!("DocuSync exited with code {}", info);
                        }
                        break;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!("Exit watcher could not query DocuSync: {}", e);
                        break;
                    }
                }
                outcome.wait_timeout(interval);
            }
            tracing::debug!("Exit watcher for session #{} exiting", session.iteration());
        })
}
