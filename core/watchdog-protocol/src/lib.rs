//! Filesystem contract between the A1 Tools app, its updater, and the service helper.
//!
//! The three processes never talk to each other directly. They coordinate through
//! a handful of well-known names: lock files in the per-user data directory, two
//! named mutexes, and the arguments the helper passes when it relaunches the app.
//! This crate is the single place those names and payloads are defined so the
//! writers and the reader cannot drift apart.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Directory under the per-user local data dir that holds everything below.
pub const PRODUCT_DIR_NAME: &str = "A1 Tools";

#[cfg(windows)]
pub const APP_EXE_NAME: &str = "a1_tools.exe";
#[cfg(not(windows))]
pub const APP_EXE_NAME: &str = "a1_tools";

/// Held by the service helper for its whole lifetime (one helper per user).
pub const SERVICE_HELPER_MUTEX_NAME: &str = "A1ToolsServiceHelperMutex";

/// Held by the app for its whole lifetime. The helper only ever probes it.
pub const APP_MUTEX_NAME: &str = "A1ToolsSingleInstanceMutex";

pub const UPDATE_LOCK_FILE: &str = ".update_in_progress";
pub const RESTART_LOCK_FILE: &str = ".restart_pending";
pub const LOG_FILE_NAME: &str = "service_helper.log";
pub const LOG_BACKUP_SUFFIX: &str = ".old";

/// Tells the app it was started without user interaction.
pub const AUTO_START_ARG: &str = "--auto-start";
/// Tells the app the service helper (not the user or the OS) started it.
pub const SERVICE_RESTART_ARG: &str = "--service-restart";
pub const RECOVERY_ARGS: [&str; 2] = [AUTO_START_ARG, SERVICE_RESTART_ARG];

/// Lowercase substrings of installer/updater executable names.
pub const INSTALLER_NAME_PATTERNS: [&str; 3] =
    ["a1-tools-setup", "a1tools_update", "a1_tools_setup"];

/// Contents of `.update_in_progress`, written by the updater.
///
/// Only existence and mtime drive decisions; the payload is informational.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateLock {
    pub started_at: String,
    pub version: String,
    #[serde(default)]
    pub pid: Option<u32>,
}

impl UpdateLock {
    pub fn new(version: impl Into<String>, pid: u32) -> Self {
        Self {
            started_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            version: version.into(),
            pid: Some(pid),
        }
    }
}

/// Contents of `.restart_pending`, written by the service helper around a relaunch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartLock {
    pub timestamp: DateTime<Utc>,
    pub pid: u32,
}

impl RestartLock {
    pub fn new(pid: u32) -> Self {
        Self {
            timestamp: Utc::now(),
            pid,
        }
    }

    pub fn for_current_process() -> Self {
        Self::new(std::process::id())
    }
}

pub fn parse_update_lock(bytes: &[u8]) -> Result<UpdateLock, serde_json::Error> {
    serde_json::from_slice(bytes)
}

pub fn parse_restart_lock(bytes: &[u8]) -> Result<RestartLock, serde_json::Error> {
    serde_json::from_slice(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_updater_written_lock() {
        let raw = br#"{"started_at":"2025-03-01T10:00:00Z","version":"2.4.1","pid":4312}"#;
        let lock = parse_update_lock(raw).unwrap();
        assert_eq!(lock.version, "2.4.1");
        assert_eq!(lock.started_at, "2025-03-01T10:00:00Z");
        assert_eq!(lock.pid, Some(4312));
    }

    #[test]
    fn update_lock_tolerates_missing_pid_and_extra_fields() {
        let raw = br#"{"started_at":"now","version":"3.0.0","channel":"beta"}"#;
        let lock = parse_update_lock(raw).unwrap();
        assert_eq!(lock.pid, None);
        assert_eq!(lock.version, "3.0.0");
    }

    #[test]
    fn rejects_truncated_update_lock() {
        assert!(parse_update_lock(br#"{"started_at":"2025-03-01T10:00"#).is_err());
    }

    #[test]
    fn restart_lock_serializes_timestamp_and_pid() {
        let lock = RestartLock::new(77);
        let json: serde_json::Value = serde_json::to_value(&lock).unwrap();
        assert_eq!(json["pid"], 77);
        let timestamp = json["timestamp"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(timestamp).is_ok());

        let parsed = parse_restart_lock(serde_json::to_string(&lock).unwrap().as_bytes()).unwrap();
        assert_eq!(parsed, lock);
    }

    #[test]
    fn installer_patterns_are_lowercase() {
        for pattern in INSTALLER_NAME_PATTERNS {
            assert_eq!(pattern, pattern.to_lowercase());
        }
    }

    #[test]
    fn recovery_args_are_stable() {
        assert_eq!(RECOVERY_ARGS, ["--auto-start", "--service-restart"]);
    }
}
