//! Heartbeat Writer Module
//!
//! Runs inside the monitored application. `HeartbeatWriter` stamps the
//! channel on demand; `HeartbeatSender` is the application's own ticker that
//! calls `beat()` on a fixed period from a background thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Utc;

use super::channel::{ChannelError, HeartbeatChannel, HeartbeatRecord, CHANNEL_NAME, CHANNEL_SIZE};

/// Default period between beats
pub const DEFAULT_BEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Stamps the current UTC time into the heartbeat channel
#[derive(Debug)]
pub struct HeartbeatWriter {
    channel: Option<HeartbeatChannel>,
}

impl HeartbeatWriter {
    /// Open (or create) the well-known DocuSync channel
    pub fn new() -> Result<Self, ChannelError> {
        Self::with_channel(CHANNEL_NAME, CHANNEL_SIZE)
    }

    pub fn with_channel(name: &str, size: usize) -> Result<Self, ChannelError> {
        let channel = HeartbeatChannel::open_or_create(name, size)?;
        Ok(Self {
            channel: Some(channel),
        })
    }

    /// Write the current time to offset 0
    pub fn beat(&self) -> Result<HeartbeatRecord, ChannelError> {
        let channel = self.channel.as_ref().ok_or(ChannelError::Closed)?;
        let now = Utc::now();
        let record = HeartbeatRecord::from_datetime(now);
        channel.write_record(record)?;
        tracing::info!("HeartBeat updated at: {}", now.to_rfc3339());
        Ok(record)
    }

    /// Release the channel handle. Idempotent; later beats fail with `Closed`.
    pub fn close(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
    }

    pub fn is_open(&self) -> bool {
        self.channel.is_some()
    }
}

impl Drop for HeartbeatWriter {
    fn drop(&mut self) {
        self.close();
    }
}

/// Periodic heartbeat ticker owned by the monitored application
pub struct HeartbeatSender {
    channel_name: String,
    channel_size: usize,
    interval: Duration,
    running: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl HeartbeatSender {
    pub fn new() -> Self {
        Self::with_channel(CHANNEL_NAME, CHANNEL_SIZE, DEFAULT_BEAT_INTERVAL)
    }

    pub fn with_channel(name: &str, size: usize, interval: Duration) -> Self {
        Self {
            channel_name: name.to_string(),
            channel_size: size,
            interval,
            running: Arc::new(AtomicBool::new(false)),
            paused: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
        }
    }

    /// Start beating in a background thread. The first beat is written
    /// before this returns.
    pub fn start(&mut self) -> Result<(), ChannelError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let writer = HeartbeatWriter::with_channel(&self.channel_name, self.channel_size)?;
        writer.beat()?;

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let paused = Arc::clone(&self.paused);
        let interval = self.interval;

        let handle = thread::Builder::new()
            .name("heartbeat-sender".to_string())
            .spawn(move || {
                let mut writer = writer;
                while running.load(Ordering::SeqCst) {
                    thread::park_timeout(interval);
                    if !running.load(Ordering::SeqCst) {
                        break;
                    }
                    if paused.load(Ordering::SeqCst) {
                        continue;
                    }
                    if let Err(e) = writer.beat() {
                        tracing::warn!("Failed to write heartbeat: {}", e);
                    }
                }
                writer.close();
                tracing::debug!("Heartbeat sender thread exiting");
            })
            .map_err(|source| ChannelError::Unavailable {
                name: self.channel_name.clone(),
                source,
            })?;

        self.thread_handle = Some(handle);
        tracing::info!(
            "Heartbeat sender started (PID: {}, every {:?})",
            std::process::id(),
            self.interval
        );
        Ok(())
    }

    /// Stop producing beats without stopping the thread. To a watchdog this
    /// is indistinguishable from a wedged event loop.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        tracing::warn!("Heartbeat sender paused");
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            handle.thread().unpark();
            let _ = handle.join();
            tracing::info!("Heartbeat sender stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Default for HeartbeatSender {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for HeartbeatSender {
    fn drop(&mut self) {
        self.stop();
    }
}
