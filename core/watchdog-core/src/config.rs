//! Tunables for the poll cycle and the log writer.
//!
//! Production always runs with the defaults below; nothing is read from disk.
//! The structs exist so tests can shrink timeouts and swap names.

use a1_watchdog_protocol::{APP_EXE_NAME, APP_MUTEX_NAME, INSTALLER_NAME_PATTERNS, RECOVERY_ARGS};
use std::time::Duration;

pub const CHECK_INTERVAL: Duration = Duration::from_secs(2 * 60);
pub const UPDATE_LOCK_TIMEOUT: Duration = Duration::from_secs(10 * 60);
pub const RESTART_LOCK_TIMEOUT: Duration = Duration::from_secs(30);
pub const LAUNCH_GRACE: Duration = Duration::from_secs(5);
pub const MAX_LOG_BYTES: u64 = 1024 * 1024; // 1MB

#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    /// Sleep between poll cycles in continuous mode.
    pub check_interval: Duration,
    /// Update lock older than this is considered abandoned by a crashed updater.
    pub update_lock_timeout: Duration,
    /// Restart lock older than this is considered abandoned by a killed helper.
    pub restart_lock_timeout: Duration,
    /// Wait after spawning before re-checking liveness.
    pub launch_grace: Duration,
    pub app_mutex_name: String,
    /// File name of the app binary, both on disk and in the process table.
    pub app_executable_name: String,
    /// Lowercase substrings identifying installer processes.
    pub installer_patterns: Vec<String>,
    pub recovery_args: Vec<String>,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            check_interval: CHECK_INTERVAL,
            update_lock_timeout: UPDATE_LOCK_TIMEOUT,
            restart_lock_timeout: RESTART_LOCK_TIMEOUT,
            launch_grace: LAUNCH_GRACE,
            app_mutex_name: APP_MUTEX_NAME.to_string(),
            app_executable_name: APP_EXE_NAME.to_string(),
            installer_patterns: INSTALLER_NAME_PATTERNS
                .iter()
                .map(|pattern| pattern.to_string())
                .collect(),
            recovery_args: RECOVERY_ARGS.iter().map(|arg| arg.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LogConfig {
    /// Size past which the log is moved to `.old` before the next write.
    pub max_bytes: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            max_bytes: MAX_LOG_BYTES,
        }
    }
}
