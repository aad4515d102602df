//! Minimal monitored application
//!
//! Beats on a heartbeat channel the way DocuSync does, and can be told to
//! stop beating or to exit with a given code after a delay. Used for manual
//! watchdog runs and by the end-to-end tests.

use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;

use docusync_watchdog::logging::{LogLevel, LoggingConfig, LoggingSystem};
use docusync_watchdog::watchdog::{HeartbeatSender, CHANNEL_NAME, CHANNEL_SIZE};

#[derive(Parser)]
#[command(name = "heartbeat-probe")]
#[command(about = "Heartbeat-writing stand-in for the DocuSync application", long_about = None)]
struct Cli {
    #[arg(long, default_value = CHANNEL_NAME)]
    channel: String,

    #[arg(long, default_value_t = CHANNEL_SIZE)]
    size: usize,

    /// Beat period
    #[arg(long, default_value_t = 5000)]
    interval_ms: u64,

    /// Stop beating (but keep running) after this long
    #[arg(long)]
    stall_after_ms: Option<u64>,

    /// Exit after this long; runs until killed otherwise
    #[arg(long)]
    exit_after_ms: Option<u64>,

    #[arg(long, default_value_t = 0)]
    exit_code: i32,
}

fn sleep_until(deadline: Instant) {
    let now = Instant::now();
    if deadline > now {
        thread::sleep(deadline - now);
    }
}

fn main() {
    let cli = Cli::parse();

    let config = LoggingConfig::development().with_level(LogLevel::Info);
    let _logging = match LoggingSystem::init(config) {
        Ok(system) => Some(system),
        Err(e) => {
            eprintln!("heartbeat-probe: logging disabled: {}", e);
            None
        }
    };

    let started = Instant::now();
    let mut sender = HeartbeatSender::with_channel(&cli.channel, cli.size, Duration::from_millis(cli.interval_ms));
    if let Err(e) = sender.start() {
        eprintln!("heartbeat-probe: {}", e);
        std::process::exit(1);
    }

    let stall_at = cli.stall_after_ms.map(|ms| started + Duration::from_millis(ms));
    let exit_at = cli.exit_after_ms.map(|ms| started + Duration::from_millis(ms));

    if let Some(stall_at) = stall_at {
        if exit_at.map_or(true, |exit_at| stall_at < exit_at) {
            sleep_until(stall_at);
            sender.pause();
        }
    }

    match exit_at {
        Some(exit_at) => {
            sleep_until(exit_at);
            sender.stop();
            tracing::info!("heartbeat-probe exiting with code {}", cli.exit_code);
            std::process::exit(cli.exit_code);
        }
        None => loop {
            thread::park();
        },
    }
}
