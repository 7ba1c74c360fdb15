//! Advisory lock files shared with the updater.
//!
//! Lock files are plain files in the data directory. They are *not* OS locks:
//! their meaning comes from existence plus modification time. A writer that
//! crashes leaves its file behind, so every lock has a staleness timeout after
//! which the reader deletes it and carries on.
//!
//! # Files
//!
//! ```text
//! A1 Tools/
//! ├── .update_in_progress   # {"started_at", "version", "pid"}   written by the updater, 10 min timeout
//! └── .restart_pending      # {"timestamp", "pid"}               written by the helper, 30 s timeout
//! ```
//!
//! # Reading
//!
//! Every read is a snapshot. Other processes may create or delete the file
//! between the stat and any later action, so callers re-inspect right before
//! doing anything externally visible.
//!
//! When a lock cannot be stat'ed or its payload cannot be parsed it is reported
//! as held: a half-written lock most likely means someone is mid-operation.
//!
//! # Writing
//!
//! The restart lock is created with create-exclusive semantics. If two helper
//! generations race into recovery, exactly one of them gets the file.

use a1_watchdog_protocol::{parse_restart_lock, parse_update_lock, RestartLock, UpdateLock};
use fs_err as fs;
use std::fmt;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::error::{Result, WatchdogError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockKind {
    Update,
    Restart,
}

impl fmt::Display for LockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockKind::Update => write!(f, "Update"),
            LockKind::Restart => write!(f, "Restart"),
        }
    }
}

/// What a single inspection of a lock file found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockState<T> {
    Absent,
    /// The lock outlived its timeout and was cleared.
    Expired { age: Duration },
    /// `age` is `None` when the file could not be stat'ed; `contents` is `None`
    /// when the payload could not be read or parsed.
    Held {
        age: Option<Duration>,
        contents: Option<T>,
    },
}

impl<T> LockState<T> {
    pub fn is_held(&self) -> bool {
        matches!(self, LockState::Held { .. })
    }
}

pub fn inspect_update_lock(path: &Path, timeout: Duration) -> LockState<UpdateLock> {
    inspect(LockKind::Update, path, timeout, parse_update_lock, &LockFs::system())
}

pub fn inspect_restart_lock(path: &Path, timeout: Duration) -> LockState<RestartLock> {
    inspect(LockKind::Restart, path, timeout, parse_restart_lock, &LockFs::system())
}

/// The two filesystem calls whose failures change the decision.
struct LockFs<'a> {
    /// mtime of the lock, `None` if it does not exist.
    modified: &'a dyn Fn(&Path) -> io::Result<Option<SystemTime>>,
    remove: &'a dyn Fn(&Path) -> io::Result<()>,
}

impl LockFs<'static> {
    fn system() -> Self {
        LockFs {
            modified: &modified_time,
            remove: &remove_file,
        }
    }
}

fn held_unknown<T>() -> LockState<T> {
    LockState::Held {
        age: None,
        contents: None,
    }
}

fn inspect<T>(
    kind: LockKind,
    path: &Path,
    timeout: Duration,
    parse: fn(&[u8]) -> std::result::Result<T, serde_json::Error>,
    lock_fs: &LockFs<'_>,
) -> LockState<T> {
    let label = kind.to_string().to_lowercase();
    let modified = match (lock_fs.modified)(path) {
        Ok(None) => return LockState::Absent,
        Ok(Some(modified)) => modified,
        Err(err) => {
            tracing::warn!(error = %err, "Error checking {} lock", label);
            return held_unknown();
        }
    };
    let mut age = age_since(modified);

    if age > timeout {
        // The writer may have refreshed the lock since the first stat.
        match (lock_fs.modified)(path) {
            Ok(None) => return LockState::Expired { age },
            Ok(Some(current)) if current != modified => {
                tracing::info!("{} lock file was rewritten, keeping it", kind);
                age = age_since(current);
            }
            Ok(Some(_)) => {
                tracing::info!(age_secs = age.as_secs(), "{} lock file is stale, removing", kind);
                match (lock_fs.remove)(path) {
                    Ok(()) => {}
                    Err(err) if err.kind() == ErrorKind::NotFound => {}
                    Err(err) => tracing::warn!(error = %err, "Failed to remove stale lock file"),
                }
                return LockState::Expired { age };
            }
            Err(err) => {
                tracing::warn!(error = %err, "Error checking {} lock", label);
                return held_unknown();
            }
        }
    }

    let contents = match fs::read(path) {
        Ok(bytes) => match parse(&bytes) {
            Ok(contents) => Some(contents),
            Err(err) => {
                tracing::warn!(error = %err, "Error parsing {} lock", label);
                None
            }
        },
        // Deleted between stat and read: the writer finished just now. Still
        // report held; the next cycle sees the truth.
        Err(err) => {
            tracing::warn!(error = %err, "Error reading {} lock", label);
            None
        }
    };

    LockState::Held {
        age: Some(age),
        contents,
    }
}

fn modified_time(path: &Path) -> io::Result<Option<SystemTime>> {
    match fs::metadata(path) {
        Ok(metadata) => metadata.modified().map(Some),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

fn remove_file(path: &Path) -> io::Result<()> {
    fs::remove_file(path)
}

/// An mtime in the future (clock skew) counts as age zero.
fn age_since(modified: SystemTime) -> Duration {
    SystemTime::now()
        .duration_since(modified)
        .unwrap_or(Duration::ZERO)
}

// =============================================================================
// Restart lock ownership
// =============================================================================

/// The restart lock held by this process for the duration of one recovery.
///
/// Dropping the guard deletes the file, so every exit path out of recovery
/// (launched, launch failed, binary missing, aborted) cleans up.
#[derive(Debug)]
pub struct RestartLockGuard {
    path: PathBuf,
    pid: u32,
}

impl RestartLockGuard {
    /// Creates the restart lock if no one else holds it.
    ///
    /// Returns `Ok(None)` when the file already exists, i.e. another helper
    /// generation is already recovering the app.
    pub fn acquire(path: &Path) -> Result<Option<Self>> {
        let lock = RestartLock::for_current_process();
        let payload = serde_json::to_vec(&lock).map_err(|source| WatchdogError::Json {
            context: "Failed to serialize restart lock".to_string(),
            source,
        })?;

        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
        {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => return Ok(None),
            Err(err) => return Err(WatchdogError::io("Failed to create restart lock", err)),
        };

        // From here on the file is ours; the guard removes it even if the write fails.
        let guard = Self {
            path: path.to_path_buf(),
            pid: lock.pid,
        };
        file.write_all(&payload)
            .map_err(|err| WatchdogError::io("Failed to write restart lock", err))?;

        Ok(Some(guard))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn still_owned(&self) -> bool {
        match fs::read(&self.path) {
            Ok(bytes) => parse_restart_lock(&bytes)
                .map(|lock| lock.pid == self.pid)
                .unwrap_or(true),
            Err(_) => true,
        }
    }
}

impl Drop for RestartLockGuard {
    fn drop(&mut self) {
        if !self.still_owned() {
            tracing::warn!("Restart lock was taken over by another helper, leaving it in place");
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!("Restart lock removed"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => tracing::warn!(error = %err, "Failed to remove restart lock"),
        }
    }
}
