//! Heartbeat Monitor Module
//!
//! Runs inside the watchdog. After a startup grace period it polls the
//! heartbeat channel on a fixed interval and raises a hang verdict once the
//! heartbeat has been stale for `max_hang_count` consecutive polls.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use super::channel::{is_fresh, ChannelError, HeartbeatChannel, CHANNEL_NAME, CHANNEL_SIZE};
use super::process::Termination;
use super::session::{SupervisionSession, Verdict};
use super::supervisor::WatchdogError;

/// Monitor timing and thresholds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    pub channel_name: String,
    pub channel_size: usize,
    /// Delay before the first poll
    pub grace_period: Duration,
    /// Delay between polls
    pub poll_interval: Duration,
    /// Maximum heartbeat age still considered alive
    pub timeout: Duration,
    /// Consecutive stale polls before the process is declared hung
    pub max_hang_count: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            channel_name: CHANNEL_NAME.to_string(),
            channel_size: CHANNEL_SIZE,
            grace_period: Duration::from_secs(10),
            poll_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(5),
            max_hang_count: 4,
        }
    }
}

impl MonitorConfig {
    /// Heartbeat silence tolerated before a kill, excluding the grace period
    pub fn hang_window(&self) -> Duration {
        self.poll_interval * self.max_hang_count
    }
}

/// Monitor lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    /// Created, channel not yet opened
    Idle,
    /// Waiting out the startup grace period
    WaitingGrace,
    /// Polling the heartbeat
    Polling,
    /// Finished; the channel has been released
    Terminal,
}

/// Result of a single poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Keep polling
    Continue,
    /// The loop is done; carries the session verdict if one exists
    Terminal(Option<Verdict>),
}

/// Cancels a running monitor from another thread. The loop notices at its
/// next wake-up.
#[derive(Debug, Clone)]
pub struct MonitorStopHandle {
    running: Arc<AtomicBool>,
}

impl MonitorStopHandle {
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Heartbeat monitor for one supervision session
#[derive(Debug)]
pub struct HeartbeatMonitor {
    config: MonitorConfig,
    channel: Option<HeartbeatChannel>,
    state: MonitorState,
    hang_count: u32,
    fresh_polls: u32,
    last_age: Option<Duration>,
    running: Arc<AtomicBool>,
}

impl HeartbeatMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            channel: None,
            state: MonitorState::Idle,
            hang_count: 0,
            fresh_polls: 0,
            last_age: None,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    /// Consecutive stale polls so far
    pub fn hang_count(&self) -> u32 {
        self.hang_count
    }

    /// Polls that found a fresh heartbeat over the monitor's lifetime
    pub fn fresh_polls(&self) -> u32 {
        self.fresh_polls
    }

    /// Heartbeat age observed by the last liveness check
    pub fn last_age(&self) -> Option<Duration> {
        self.last_age
    }

    pub fn stop_handle(&self) -> MonitorStopHandle {
        MonitorStopHandle {
            running: Arc::clone(&self.running),
        }
    }

    /// Acquire the channel and arm the loop without waiting out the grace
    /// period. `start` does this itself.
    pub fn open(&mut self) -> Result<(), ChannelError> {
        if self.channel.is_none() {
            let channel =
                HeartbeatChannel::open_or_create(&self.config.channel_name, self.config.channel_size)?;
            self.channel = Some(channel);
        }
        self.running.store(true, Ordering::SeqCst);
        self.state = MonitorState::Polling;
        Ok(())
    }

    /// Run the poll loop until a terminal transition. Blocks the caller.
    ///
    /// Returns the session verdict, or `None` when the monitor was stopped
    /// before anything decisive happened. The channel is released on every
    /// path.
    pub fn start(&mut self, session: &SupervisionSession) -> Result<Option<Verdict>, WatchdogError> {
        let result = self.run(session);
        self.stop();
        result
    }

    fn run(&mut self, session: &SupervisionSession) -> Result<Option<Verdict>, WatchdogError> {
        self.open()?;
        self.state = MonitorState::WaitingGrace;

        tracing::info!("DocuSync HeartBeat Monitor is starting...");
        tracing::info!(
            "Waiting {:.0}s for DocuSync to start...",
            self.config.grace_period.as_secs_f64()
        );
        session.outcome().wait_timeout(self.config.grace_period);

        self.state = MonitorState::Polling;
        tracing::info!("DocuSync HeartBeat Monitor is now running!");

        loop {
            if let Tick::Terminal(verdict) = self.tick(session)? {
                return Ok(verdict);
            }
            session.outcome().wait_timeout(self.config.poll_interval);
        }
    }

    /// One poll. Exit observation takes precedence over the hang counter.
    pub fn tick(&mut self, session: &SupervisionSession) -> Result<Tick, WatchdogError> {
        if self.state == MonitorState::Terminal || !self.running.load(Ordering::SeqCst) {
            self.state = MonitorState::Terminal;
            return Ok(Tick::Terminal(session.outcome().get()));
        }

        let outcome = session.outcome();

        if let Some(info) = session.process().exit_info()? {
            outcome.decide(Verdict::from_exit(info));
            if info.is_clean() {
                tracing::info!("DocuSync exited cleanly, monitor stopping");
            } else {
                tracing::warn!("DocuSync exited with code {}", info);
            }
            self.state = MonitorState::Terminal;
            return Ok(Tick::Terminal(outcome.get()));
        }

        if let Some(verdict) = outcome.get() {
            tracing::debug!("Session already resolved ({}), monitor stopping", verdict);
            self.state = MonitorState::Terminal;
            return Ok(Tick::Terminal(Some(verdict)));
        }

        if self.is_alive(self.config.timeout)? {
            self.hang_count = 0;
            self.fresh_polls = self.fresh_polls.saturating_add(1);
        } else {
            self.hang_count += 1;
            match self.last_age {
                Some(age) if age != Duration::MAX => tracing::warn!(
                    "Last HeartBeat from DocuSync was {:.1}s ago! ({}/{})",
                    age.as_secs_f64(),
                    self.hang_count,
                    self.config.max_hang_count
                ),
                _ => tracing::warn!(
                    "No HeartBeat from DocuSync yet! ({}/{})",
                    self.hang_count,
                    self.config.max_hang_count
                ),
            }
        }

        if self.hang_count < self.config.max_hang_count {
            return Ok(Tick::Continue);
        }

        self.hang_count = 0;
        self.state = MonitorState::Terminal;

        match session.process().terminate()? {
            Termination::Killed => {
                tracing::error!(
                    "DocuSync failed HeartBeat for {:.0}s! Considering application unresponsive, killing PID {}",
                    self.config.hang_window().as_secs_f64(),
                    session.process().id()
                );
                outcome.decide(Verdict::Hung);
            }
            Termination::AlreadyExited(info) => {
                tracing::info!("DocuSync exited (code {}) before it could be killed", info);
                outcome.decide(Verdict::from_exit(info));
            }
        }

        Ok(Tick::Terminal(outcome.get()))
    }

    /// Single-shot liveness check: the last beat is at most `timeout` old
    pub fn is_alive(&mut self, timeout: Duration) -> Result<bool, ChannelError> {
        let channel = self.channel.as_ref().ok_or(ChannelError::Closed)?;
        let record = channel.read_record()?;
        let age = record.age_at(Utc::now());
        self.last_age = Some(age);
        Ok(is_fresh(age, timeout))
    }

    /// Halt the loop and release the channel. Idempotent.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.state = MonitorState::Terminal;

        if let Some(mut channel) = self.channel.take() {
            tracing::info!("DocuSync HeartBeat Monitor is now stopping!");
            channel.close();
            tracing::info!("DocuSync HeartBeat Monitor has stopped!");
        }
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
