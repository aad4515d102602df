//! Shared fakes for watchdog unit tests

use std::collections::VecDeque;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use super::process::{ExitInfo, MonitoredProcess, ProcessLauncher, Termination};
use super::supervisor::WatchdogError;

/// Channel name unique to this test process and call. Kept short for the
/// macOS shm name limit.
pub(crate) fn unique_channel_name() -> String {
    static COUNTER: AtomicU32 = AtomicU32::new(0);
    format!(
        "dst{}_{}",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::SeqCst)
    )
}

/// In-memory process whose exit is controlled by the test
pub(crate) struct FakeProcess {
    id: u32,
    exit: Mutex<Option<ExitInfo>>,
    exited: Condvar,
    kills: AtomicU32,
}

impl FakeProcess {
    pub(crate) fn new() -> Self {
        static NEXT_PID: AtomicU32 = AtomicU32::new(40_000);
        Self {
            id: NEXT_PID.fetch_add(1, Ordering::SeqCst),
            exit: Mutex::new(None),
            exited: Condvar::new(),
            kills: AtomicU32::new(0),
        }
    }

    /// A process that has already exited with `code`
    pub(crate) fn exited(code: i32) -> Self {
        let process = Self::new();
        process.finish(code);
        process
    }

    pub(crate) fn finish(&self, code: i32) {
        let mut exit = self.exit.lock();
        if exit.is_none() {
            *exit = Some(ExitInfo::exited(code));
            self.exited.notify_all();
        }
    }

    pub(crate) fn kill_count(&self) -> u32 {
        self.kills.load(Ordering::SeqCst)
    }
}

impl MonitoredProcess for FakeProcess {
    fn id(&self) -> u32 {
        self.id
    }

    fn exit_info(&self) -> io::Result<Option<ExitInfo>> {
        Ok(*self.exit.lock())
    }

    fn terminate(&self) -> io::Result<Termination> {
        let mut exit = self.exit.lock();
        if let Some(info) = *exit {
            return Ok(Termination::AlreadyExited(info));
        }
        *exit = Some(ExitInfo::killed(None));
        self.kills.fetch_add(1, Ordering::SeqCst);
        self.exited.notify_all();
        Ok(Termination::Killed)
    }

    fn wait(&self) -> io::Result<ExitInfo> {
        let mut exit = self.exit.lock();
        loop {
            if let Some(info) = *exit {
                return Ok(info);
            }
            self.exited.wait(&mut exit);
        }
    }
}

/// Hands out scripted processes in order, then fails to launch
pub(crate) struct FakeLauncher {
    processes: Mutex<VecDeque<Arc<FakeProcess>>>,
    launches: Arc<AtomicU32>,
}

impl FakeLauncher {
    pub(crate) fn new(processes: Vec<Arc<FakeProcess>>) -> Self {
        Self {
            processes: Mutex::new(processes.into()),
            launches: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Counter of successful launches, readable after the launcher is moved
    pub(crate) fn launches(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.launches)
    }
}

impl ProcessLauncher for FakeLauncher {
    fn launch(&self) -> Result<Arc<dyn MonitoredProcess>, WatchdogError> {
        let process = self.processes.lock().pop_front().ok_or_else(|| {
            WatchdogError::ProcessLaunch {
                executable: PathBuf::from("fake-docusync"),
                source: io::Error::new(io::ErrorKind::NotFound, "no scripted process left"),
            }
        })?;
        self.launches.fetch_add(1, Ordering::SeqCst);
        Ok(process as Arc<dyn MonitoredProcess>)
    }

    fn describe(&self) -> String {
        "fake-docusync".to_string()
    }
}
