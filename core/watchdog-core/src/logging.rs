//! Log file setup for the service helper.
//!
//! The helper has no console, so everything goes to
//! `<data dir>/service_helper.log`. The file is capped by size with a single
//! `.old` backup generation.

use chrono::Local;
use fs_err as fs;
use std::env;
use std::io::{self, ErrorKind, Write};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;
use crate::storage::StorageConfig;

/// Set to `1`, `true` or `yes` to force debug-level logging.
pub const DEBUG_ENV_VAR: &str = "A1_SERVICE_HELPER_DEBUG";

/// Installs the global subscriber writing to the rotating log file.
///
/// The returned guard flushes buffered lines when dropped; hold it for the
/// life of the process. Calling this twice leaves the first subscriber in place.
pub fn init(storage: &StorageConfig, config: LogConfig) -> WorkerGuard {
    let writer = RotatingFile::open(storage.log_file(), storage.log_backup_file(), config.max_bytes);
    let (non_blocking, guard) = tracing_appender::non_blocking(writer);

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(false)
        .with_timer(LocalTimestamp)
        .try_init();

    guard
}

fn env_filter() -> EnvFilter {
    if debug_forced(env::var(DEBUG_ENV_VAR).ok().as_deref()) {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

fn debug_forced(value: Option<&str>) -> bool {
    value
        .map(|value| matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

/// `[2025-03-01 10:00:00]` in local time.
#[derive(Debug, Clone, Copy)]
pub struct LocalTimestamp;

impl FormatTime for LocalTimestamp {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "[{}]", Local::now().format("%Y-%m-%d %H:%M:%S"))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Size-capped file writer
// ─────────────────────────────────────────────────────────────────────────────

/// Append-only log file that moves itself to a backup once it grows past
/// `max_bytes`.
///
/// The size check happens before each write, so a single write can push the
/// file over the limit; the next write rotates. Another helper process may
/// share the file (a verify run next to the long-running helper), so a writer
/// only rotates when its handle is still the file at `path`; otherwise it
/// reopens `path` and continues there. Any failure while rotating
/// leaves the writer appending to the current file. If the file cannot be
/// opened at all, writes are dropped and reopening is retried on the next
/// write.
#[derive(Debug)]
pub struct RotatingFile {
    path: PathBuf,
    backup_path: PathBuf,
    max_bytes: u64,
    file: Option<fs::File>,
    size: u64,
}

impl RotatingFile {
    pub fn open(path: PathBuf, backup_path: PathBuf, max_bytes: u64) -> Self {
        let mut writer = Self {
            path,
            backup_path,
            max_bytes,
            file: None,
            size: 0,
        };
        writer.reopen();
        writer
    }

    fn reopen(&mut self) {
        match fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
        {
            Ok(file) => {
                self.size = file.metadata().map(|meta| meta.len()).unwrap_or(0);
                self.file = Some(file);
            }
            Err(_) => self.file = None,
        }
    }

    /// Whether the open handle is still the file at `path`, i.e. nobody
    /// rotated or deleted it since we opened it.
    fn handle_is_current(&self) -> bool {
        let Some(file) = self.file.as_ref() else {
            return false;
        };
        match (file.metadata(), fs::metadata(&self.path)) {
            (Ok(handle), Ok(on_disk)) => same_file(&handle, &on_disk),
            _ => false,
        }
    }

    fn rotate(&mut self) {
        // Close first: Windows refuses to rename an open file.
        self.file = None;

        let backup_cleared = match fs::remove_file(&self.backup_path) {
            Ok(()) => true,
            Err(err) => err.kind() == ErrorKind::NotFound,
        };
        if backup_cleared {
            let _ = fs::rename(&self.path, &self.backup_path);
        }

        self.reopen();
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.size > self.max_bytes {
            if self.handle_is_current() {
                self.rotate();
            } else {
                self.reopen();
                if self.size > self.max_bytes {
                    self.rotate();
                }
            }
        }
        if self.file.is_none() {
            self.reopen();
        }

        match self.file.as_mut() {
            Some(file) => {
                let written = file.write(buf)?;
                self.size += written as u64;
                Ok(written)
            }
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

#[cfg(unix)]
fn same_file(a: &std::fs::Metadata, b: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    a.dev() == b.dev() && a.ino() == b.ino()
}

// No stable file index on other platforms; a rotated-away handle and the fresh
// file at `path` differ in length in practice.
#[cfg(not(unix))]
fn same_file(a: &std::fs::Metadata, b: &std::fs::Metadata) -> bool {
    a.len() == b.len()
}
