//! DocuSync Watchdog Process
//!
//! Independent supervisor process that launches DocuSync, watches its
//! shared memory heartbeat and restarts it after a crash or a hang.
//!
//! Usage:
//!   watchdog [OPTIONS] [-- <CHILD ARGS>...]
//!   watchdog mirror <FOLDER>
//!   watchdog show-config
//!
//! Exit codes: 0 clean stop, 1 internal failure, 2 launch failure,
//! 3 invalid configuration.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::runtime::Runtime;

use docusync_watchdog::config::{SettingsStore, SettingsStoreConfig, WatchdogSettings};
use docusync_watchdog::logging::{LogLevel, LoggingSystem};
use docusync_watchdog::mirror::Mirror;
use docusync_watchdog::watchdog::{
    CommandLauncher, RestartPolicy, Supervisor, SupervisorConfig, EXIT_FAILURE, EXIT_OK,
};
use docusync_watchdog::DocuSyncError;

#[derive(Parser)]
#[command(name = "watchdog")]
#[command(about = "Heartbeat supervisor for DocuSync", long_about = None)]
#[command(version)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    /// Settings file (default: per-user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured log level
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    #[command(flatten)]
    run: RunArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Move a finished folder to the remote share
    Mirror {
        /// Folder to move, relative paths resolve against the local folder
        folder: PathBuf,
    },

    /// Print the effective settings as JSON
    ShowConfig,
}

/// Overrides for supervising the application
#[derive(Args, Default)]
struct RunArgs {
    /// Path to the monitored executable
    #[arg(short, long)]
    executable: Option<PathBuf>,

    /// Restart policy: prompt, always or never
    #[arg(short, long)]
    policy: Option<RestartPolicy>,

    /// Give up after this many consecutive restarts
    #[arg(short, long)]
    max_restarts: Option<u32>,

    /// Heartbeat channel name
    #[arg(long)]
    channel: Option<String>,

    #[arg(long)]
    grace_period_ms: Option<u64>,

    #[arg(long)]
    poll_interval_ms: Option<u64>,

    /// Heartbeat age after which a poll counts as stale
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Consecutive stale polls before the application is killed
    #[arg(long)]
    max_hang_count: Option<u32>,

    /// Arguments passed to the monitored executable
    #[arg(last = true)]
    args: Vec<String>,
}

impl RunArgs {
    fn apply(self, settings: &mut WatchdogSettings) {
        if let Some(executable) = self.executable {
            settings.child.executable = executable;
        }
        if !self.args.is_empty() {
            settings.child.args = self.args;
        }
        if let Some(policy) = self.policy {
            settings.restart.policy = policy;
        }
        if self.max_restarts.is_some() {
            settings.restart.max_restarts = self.max_restarts;
        }
        if let Some(channel) = self.channel {
            settings.heartbeat.channel_name = channel;
        }
        if let Some(ms) = self.grace_period_ms {
            settings.heartbeat.grace_period_ms = ms;
        }
        if let Some(ms) = self.poll_interval_ms {
            settings.heartbeat.poll_interval_ms = ms;
        }
        if let Some(ms) = self.timeout_ms {
            settings.heartbeat.timeout_ms = ms;
        }
        if let Some(count) = self.max_hang_count {
            settings.heartbeat.max_hang_count = count;
        }
    }
}

fn load_settings(runtime: &Runtime, path: Option<&Path>) -> Result<WatchdogSettings, DocuSyncError> {
    let options = match path {
        // An explicit file must exist
        Some(path) => SettingsStoreConfig {
            create_default: false,
            ..SettingsStoreConfig::for_file(path)
        },
        None => SettingsStoreConfig::default(),
    };
    let store = runtime.block_on(SettingsStore::new(options))?;
    Ok(runtime.block_on(store.get()))
}

fn init_logging(settings: &WatchdogSettings, level: Option<LogLevel>) -> Result<LoggingSystem, DocuSyncError> {
    let mut config = settings.logging.clone();
    if let Some(level) = level {
        config.level = level;
    }
    Ok(LoggingSystem::init(config)?)
}

fn supervise(settings: &WatchdogSettings) -> i32 {
    let child = &settings.child;
    let mut launcher = CommandLauncher::new(&child.executable).with_args(child.args.iter().cloned());
    if let Some(ref dir) = child.working_dir {
        launcher = launcher.with_working_dir(dir);
    }

    let decider = settings.restart.policy.decider(settings.restart.max_restarts);
    let mut supervisor = Supervisor::new(Box::new(launcher), decider, SupervisorConfig::from(settings));

    let shutdown = supervisor.shutdown_handle();
    if let Err(e) = ctrlc::set_handler(move || {
        tracing::info!("Interrupt received, stopping watchdog");
        shutdown.request();
    }) {
        tracing::warn!(error = %e, "Failed to install Ctrl-C handler; interrupts will not stop the watchdog cleanly");
    }

    tracing::info!("Starting DocuSync Watchdog");
    tracing::info!("Monitoring: {:?}", child.executable);
    tracing::info!(
        "Heartbeat channel {:?}, timeout {}ms, {} stale polls allowed",
        settings.heartbeat.channel_name,
        settings.heartbeat.timeout_ms,
        settings.heartbeat.max_hang_count
    );

    supervisor.run().exit_code()
}

fn run(cli: Cli) -> Result<i32> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    let mut settings = load_settings(&runtime, cli.config.as_deref()).context("Failed to load settings")?;

    match cli.command {
        Some(Commands::ShowConfig) => {
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(EXIT_OK)
        }
        Some(Commands::Mirror { folder }) => {
            settings.validate().map_err(DocuSyncError::from)?;
            let _logging = init_logging(&settings, cli.log_level)?;

            let folder = if folder.is_absolute() {
                folder
            } else {
                settings.sync.absolute_local_path(&folder)
            };
            let result = runtime
                .block_on(Mirror::new().move_folder_to_remote(&folder, &settings.sync))
                .map_err(DocuSyncError::from)
                .with_context(|| format!("Failed to move {}", folder.display()))?;
            tracing::debug!("Robocopy output:\n{}", result.output);
            Ok(EXIT_OK)
        }
        None => {
            cli.run.apply(&mut settings);
            settings.validate().map_err(DocuSyncError::from)?;
            let _logging = init_logging(&settings, cli.log_level)?;

            // The supervisor blocks; the runtime is only needed for settings I/O
            drop(runtime);
            Ok(supervise(&settings))
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            e.downcast_ref::<DocuSyncError>()
                .map(DocuSyncError::exit_code)
                .unwrap_or(EXIT_FAILURE)
        }
    };
    std::process::exit(code);
}
