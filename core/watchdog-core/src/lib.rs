//! # a1-watchdog-core
//!
//! Liveness probing and recovery for the A1 Tools service helper.
//!
//! The helper is a background process that keeps the A1 Tools app running
//! without fighting the updater. This crate holds everything except the
//! process entry point:
//!
//! - **Locks**: the update and restart lock files, with staleness handling.
//! - **Probes**: named mutexes and the process table behind small traits so the
//!   poll logic can be tested without an OS.
//! - **Recovery**: the poll cycle itself and the detached relaunch.
//! - **Logging**: the size-capped log file the helper writes to.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use a1_watchdog_core::{StorageConfig, SystemWatchdog, WatchdogConfig};
//!
//! let storage = StorageConfig::resolve()?;
//! let mut watchdog = SystemWatchdog::system(storage, WatchdogConfig::default());
//! let outcome = watchdog.run_cycle();
//! ```

pub mod config;
pub mod error;
pub mod launcher;
pub mod locks;
pub mod logging;
pub mod mutex;
pub mod process;
pub mod storage;
pub mod watchdog;

pub use config::{LogConfig, WatchdogConfig};
pub use error::{Result, WatchdogError};
pub use launcher::{DetachedLauncher, Launcher};
pub use locks::{LockState, RestartLockGuard};
pub use mutex::{NamedMutexes, SystemMutexes};
pub use process::{ProcessTable, SystemProcessTable};
pub use storage::StorageConfig;
pub use watchdog::{
    AbortReason, CycleOutcome, Liveness, LivenessSignal, RecoveryOutcome, SystemWatchdog,
    Watchdog,
};
