//! Supervision sessions
//!
//! One `SupervisionSession` exists per launch of the monitored process. Its
//! `SessionOutcome` is a one-shot cell written by whichever activity reaches
//! a decisive result first: the exit watcher, the heartbeat monitor, or a
//! shutdown request. Later writers are ignored.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::process::{ExitInfo, MonitoredProcess};

/// How one supervision session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The process exited on its own with code 0
    CleanExit,
    /// The process exited on its own with a nonzero code or a signal
    Crashed(ExitInfo),
    /// The process stopped producing heartbeats and was killed
    Hung,
    /// Supervision was interrupted; the process was left alone
    Interrupted,
}

impl Verdict {
    /// Classify an observed exit. Forced exits are hang kills.
    pub fn from_exit(info: ExitInfo) -> Self {
        if info.forced {
            Verdict::Hung
        } else if info.is_clean() {
            Verdict::CleanExit
        } else {
            Verdict::Crashed(info)
        }
    }

    pub fn restart_requested(&self) -> bool {
        matches!(self, Verdict::Crashed(_) | Verdict::Hung)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::CleanExit => write!(f, "clean exit"),
            Verdict::Crashed(info) => write!(f, "crashed (code {})", info),
            Verdict::Hung => write!(f, "hung, killed by watchdog"),
            Verdict::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// One-shot completion cell with wake-up for waiters
#[derive(Debug, Default)]
pub struct SessionOutcome {
    verdict: Mutex<Option<Verdict>>,
    decided: Condvar,
}

impl SessionOutcome {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `verdict` unless a verdict already exists. Returns whether this
    /// call won.
    pub fn decide(&self, verdict: Verdict) -> bool {
        let mut slot = self.verdict.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(verdict);
        self.decided.notify_all();
        true
    }

    pub fn get(&self) -> Option<Verdict> {
        *self.verdict.lock()
    }

    pub fn is_decided(&self) -> bool {
        self.verdict.lock().is_some()
    }

    /// Sleep for up to `timeout`, returning early once a verdict exists
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Verdict> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.verdict.lock();
        while slot.is_none() {
            if self.decided.wait_until(&mut slot, deadline).timed_out() {
                break;
            }
        }
        *slot
    }

    /// Block until a verdict exists
    pub fn wait(&self) -> Verdict {
        let mut slot = self.verdict.lock();
        loop {
            if let Some(verdict) = *slot {
                return verdict;
            }
            self.decided.wait(&mut slot);
        }
    }
}

/// State for one run of the monitored process
#[derive(Clone)]
pub struct SupervisionSession {
    iteration: u32,
    process: Arc<dyn MonitoredProcess>,
    outcome: Arc<SessionOutcome>,
}

impl SupervisionSession {
    pub fn new(iteration: u32, process: Arc<dyn MonitoredProcess>) -> Self {
        Self {
            iteration,
            process,
            outcome: Arc::new(SessionOutcome::new()),
        }
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn process(&self) -> &Arc<dyn MonitoredProcess> {
        &self.process
    }

    pub fn outcome(&self) -> &Arc<SessionOutcome> {
        &self.outcome
    }

    /// True once a crash or a hang has been recorded
    pub fn restart_requested(&self) -> bool {
        self.outcome
            .get()
            .map(|v| v.restart_requested())
            .unwrap_or(false)
    }
}

impl fmt::Debug for SupervisionSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupervisionSession")
            .field("iteration", &self.iteration)
            .field("pid", &self.process.id())
            .field("verdict", &self.outcome.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_first_verdict_wins() {
        let outcome = SessionOutcome::new();
        assert!(outcome.decide(Verdict::CleanExit));
        assert!(!outcome.decide(Verdict::Crashed(ExitInfo::exited(1))));
        assert_eq!(outcome.get(), Some(Verdict::CleanExit));
    }

    #[test]
    fn test_wait_timeout_returns_early_on_decision() {
        let outcome = Arc::new(SessionOutcome::new());
        let writer = Arc::clone(&outcome);

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            writer.decide(Verdict::Interrupted);
        });

        let started = Instant::now();
        assert_eq!(outcome.wait_timeout(Duration::from_secs(10)), Some(Verdict::Interrupted));
        assert!(started.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }

    #[test]
    fn test_wait_timeout_expires_without_decision() {
        let outcome = SessionOutcome::new();
        assert_eq!(outcome.wait_timeout(Duration::from_millis(10)), None);
        assert!(!outcome.is_decided());
    }

    #[test]
    fn test_verdict_classification() {
        assert_eq!(Verdict::from_exit(ExitInfo::exited(0)), Verdict::CleanExit);
        assert_eq!(
            Verdict::from_exit(ExitInfo::exited(1)),
            Verdict::Crashed(ExitInfo::exited(1))
        );
        assert_eq!(Verdict::from_exit(ExitInfo::killed(Some(0))), Verdict::Hung);

        assert!(!Verdict::CleanExit.restart_requested());
        assert!(!Verdict::Interrupted.restart_requested());
        assert!(Verdict::Crashed(ExitInfo::exited(-1)).restart_requested());
        assert!(Verdict::Hung.restart_requested());
    }
}
