//! Watchdog Module
//!
//! Heartbeat-based supervision for the DocuSync application. The monitored
//! application stamps a timestamp into a named shared memory segment; the
//! watchdog launches it, polls that timestamp and kills and relaunches the
//! application once the heartbeat has gone stale for long enough.

pub mod channel;
pub mod monitor;
pub mod process;
pub mod restart;
pub mod session;
pub mod supervisor;
pub mod writer;

#[cfg(test)]
pub(crate) mod test_support;


pub use channel::{
    is_fresh, remove_channel, ChannelError, HeartbeatChannel, HeartbeatRecord, CHANNEL_NAME,
    CHANNEL_SIZE,
};
pub use monitor::{HeartbeatMonitor, MonitorConfig, MonitorState, MonitorStopHandle, Tick};
pub use process::{ChildProcess, CommandLauncher, ExitInfo, MonitoredProcess, ProcessLauncher, Termination};
pub use restart::{AlwaysRestart, LimitedRestarts, NeverRestart, PromptRestart, RestartDecider, RestartPolicy};
pub use session::{SessionOutcome, SupervisionSession, Verdict};
pub use supervisor::{
    ShutdownHandle, StopReason, Supervisor, SupervisorConfig, WatchdogError, EXIT_CONFIG,
    EXIT_FAILURE, EXIT_LAUNCH_FAILED, EXIT_OK,
};
pub use writer::{HeartbeatSender, HeartbeatWriter, DEFAULT_BEAT_INTERVAL};
