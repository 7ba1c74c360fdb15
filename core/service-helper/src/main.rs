#![cfg_attr(windows, windows_subsystem = "windows")]
//! A1 Tools service helper entrypoint.
//!
//! Runs in the background for the logged-in user and restarts the app if it
//! disappears outside of an update. One instance per user; a second copy
//! exits immediately. The exit code is always 0.

use a1_watchdog_core::{
    logging, LogConfig, NamedMutexes, StorageConfig, SystemMutexes, SystemWatchdog,
    WatchdogConfig,
};
use a1_watchdog_protocol::SERVICE_HELPER_MUTEX_NAME;
use clap::error::ErrorKind;
use clap::Parser;
use tracing::{error, info, warn};

const VERIFY_FLAGS: [&str; 2] = ["--check-once", "--verify"];

#[derive(Debug, Parser)]
#[command(name = "a1-service-helper", version, about = "Keeps A1 Tools running")]
struct Cli {
    /// Run a single check, then exit.
    #[arg(long = "check-once", alias = "verify")]
    check_once: bool,
}

/// Unrecognised arguments are ignored rather than rejected.
fn parse_cli() -> Cli {
    match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            err.exit()
        }
        Err(_) => Cli {
            check_once: std::env::args()
                .skip(1)
                .any(|arg| VERIFY_FLAGS.contains(&arg.as_str())),
        },
    }
}

fn main() {
    let cli = parse_cli();

    // Without a data directory there is nowhere to log or find the app.
    let Ok(storage) = StorageConfig::resolve() else {
        return;
    };
    let root_created = storage.ensure_root();

    let _log_guard = logging::init(&storage, LogConfig::default());

    if let Err(err) = root_created {
        warn!(error = %err, "Failed to create data directory");
    }

    run(cli, storage);
}

fn run(cli: Cli, storage: StorageConfig) {
    let _instance = match SystemMutexes::system().acquire(SERVICE_HELPER_MUTEX_NAME) {
        Ok(Some(guard)) => guard,
        Ok(None) => {
            info!("Service helper already running, exiting");
            return;
        }
        Err(err) => {
            error!(error = %err, "Failed to acquire service helper mutex, exiting");
            return;
        }
    };

    let config = WatchdogConfig::default();
    info!(version = env!("CARGO_PKG_VERSION"), "Service helper started");
    info!("Check interval: {} seconds", config.check_interval.as_secs());
    info!("Data directory: {}", storage.root().display());

    let mut watchdog = SystemWatchdog::system(storage, config);

    if cli.check_once {
        info!("Running in verify mode");
        let outcome = watchdog.run_cycle();
        info!(outcome = ?outcome, "Verify complete");
        return;
    }

    watchdog.run_continuous()
}
