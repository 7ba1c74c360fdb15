//! Path layout for the per-user A1 Tools data directory.
//!
//! Every file the service helper touches lives in one directory, normally
//! `<local app data>/A1 Tools`. Centralising the layout here keeps the poll logic
//! free of path joins and lets tests point everything at a temp dir.

use a1_watchdog_protocol::{
    LOG_BACKUP_SUFFIX, LOG_FILE_NAME, PRODUCT_DIR_NAME, RESTART_LOCK_FILE, UPDATE_LOCK_FILE,
};
use fs_err as fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, WatchdogError};

/// Production code uses [`StorageConfig::resolve`]; tests use
/// [`StorageConfig::with_root`] for isolation.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    root: PathBuf,
}

impl StorageConfig {
    /// Resolves `<local app data>/A1 Tools` for the current user.
    pub fn resolve() -> Result<Self> {
        let base = dirs::data_local_dir().ok_or(WatchdogError::DataDirNotFound)?;
        Ok(Self::with_root(base.join(PRODUCT_DIR_NAME)))
    }

    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Coordination files
    // ─────────────────────────────────────────────────────────────────────────────

    /// Written by the updater while an update is running.
    pub fn update_lock_file(&self) -> PathBuf {
        self.root.join(UPDATE_LOCK_FILE)
    }

    /// Written by the service helper around a relaunch.
    pub fn restart_lock_file(&self) -> PathBuf {
        self.root.join(RESTART_LOCK_FILE)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // App binary and logs
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn app_executable(&self, file_name: &str) -> PathBuf {
        self.root.join(file_name)
    }

    pub fn log_file(&self) -> PathBuf {
        self.root.join(LOG_FILE_NAME)
    }

    /// Single backup generation kept by log rotation (`service_helper.log.old`).
    pub fn log_backup_file(&self) -> PathBuf {
        self.root.join(format!("{}{}", LOG_FILE_NAME, LOG_BACKUP_SUFFIX))
    }

    /// Creates the data directory if it is missing (fresh install, wiped profile).
    pub fn ensure_root(&self) -> Result<()> {
        fs::create_dir_all(&self.root)
            .map_err(|err| WatchdogError::io("Failed to create data directory", err))
    }
}
