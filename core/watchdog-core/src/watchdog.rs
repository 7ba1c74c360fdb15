//! The poll cycle: decide whether the app needs restarting, and restart it.
//!
//! Each cycle walks a fixed ladder of skip conditions and only relaunches when
//! every one of them is clear:
//!
//! ```text
//! update lock held ──────────► UpdateInProgress
//! restart lock held ─────────► RestartPending
//! installer process running ─► InstallerRunning
//! app mutex or app process ──► AppAlive
//! probe failed ──────────────► Inconclusive
//! otherwise ─────────────────► recover()
//! ```
//!
//! No state is carried between cycles. Every probe failure resolves to the
//! branch that does *not* launch.

use std::path::PathBuf;
use std::thread;

use crate::config::WatchdogConfig;
use crate::launcher::{DetachedLauncher, Launcher};
use crate::locks::{inspect_restart_lock, inspect_update_lock, LockState, RestartLockGuard};
use crate::mutex::{NamedMutexes, SystemMutexes};
use crate::process::{find_installer, is_app_listed, ProcessTable, SystemProcessTable};
use crate::storage::StorageConfig;

/// Which signal showed the app alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessSignal {
    Mutex,
    ProcessTable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Liveness {
    Alive(LivenessSignal),
    Absent,
    /// Neither signal could be read.
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    UpdateStarted,
    InstallerStarted,
    AppAppeared,
    LivenessUnknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// Launched and seen alive after the grace period.
    Started { pid: u32 },
    /// Launched but not seen alive after the grace period.
    Unconfirmed { pid: u32 },
    ExecutableMissing(PathBuf),
    LaunchFailed,
    /// Another helper already holds the restart lock.
    Contended,
    /// The restart lock could not be written.
    LockUnavailable,
    /// Pre-launch re-check found the situation changed.
    Aborted(AbortReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    UpdateInProgress,
    RestartPending,
    InstallerRunning { process: String },
    AppAlive(LivenessSignal),
    Inconclusive { reason: String },
    Recovered(RecoveryOutcome),
}

impl CycleOutcome {
    pub fn launched(&self) -> bool {
        matches!(
            self,
            CycleOutcome::Recovered(
                RecoveryOutcome::Started { .. } | RecoveryOutcome::Unconfirmed { .. }
            )
        )
    }
}

pub struct Watchdog<P, M, L> {
    storage: StorageConfig,
    config: WatchdogConfig,
    processes: P,
    mutexes: M,
    launcher: L,
}

/// The watchdog wired to the real OS.
pub type SystemWatchdog = Watchdog<SystemProcessTable, SystemMutexes, DetachedLauncher>;

impl SystemWatchdog {
    pub fn system(storage: StorageConfig, config: WatchdogConfig) -> Self {
        Watchdog::new(
            storage,
            config,
            SystemProcessTable::new(),
            SystemMutexes::system(),
            DetachedLauncher::new(),
        )
    }
}

impl<P, M, L> Watchdog<P, M, L>
where
    P: ProcessTable,
    M: NamedMutexes,
    L: Launcher,
{
    pub fn new(
        storage: StorageConfig,
        config: WatchdogConfig,
        processes: P,
        mutexes: M,
        launcher: L,
    ) -> Self {
        Self {
            storage,
            config,
            processes,
            mutexes,
            launcher,
        }
    }

    pub fn storage(&self) -> &StorageConfig {
        &self.storage
    }

    pub fn config(&self) -> &WatchdogConfig {
        &self.config
    }

    /// Polls forever. Only an external kill ends the process.
    pub fn run_continuous(&mut self) -> ! {
        loop {
            self.run_cycle();
            thread::sleep(self.config.check_interval);
        }
    }

    /// Runs one check and, if needed, one recovery attempt.
    pub fn run_cycle(&mut self) -> CycleOutcome {
        let outcome = self.check_and_recover();
        tracing::debug!(outcome = ?outcome, "Check complete");
        outcome
    }

    fn check_and_recover(&mut self) -> CycleOutcome {
        if self.update_in_progress() {
            return CycleOutcome::UpdateInProgress;
        }

        let restart_lock = inspect_restart_lock(
            &self.storage.restart_lock_file(),
            self.config.restart_lock_timeout,
        );
        if restart_lock.is_held() {
            tracing::info!("Restart already pending, skipping check");
            return CycleOutcome::RestartPending;
        }

        let names = match self.processes.process_names() {
            Ok(names) => names,
            Err(err) => {
                tracing::warn!(error = %err, "Error checking for installer processes");
                return CycleOutcome::Inconclusive {
                    reason: err.to_string(),
                };
            }
        };

        if let Some(installer) = find_installer(&names, &self.config.installer_patterns) {
            tracing::info!("Installer running: {}, skipping check", installer);
            return CycleOutcome::InstallerRunning {
                process: installer.to_string(),
            };
        }

        match self.probe_liveness(Some(names.as_slice())) {
            Liveness::Alive(signal) => {
                tracing::info!(signal = ?signal, "App is running normally");
                CycleOutcome::AppAlive(signal)
            }
            Liveness::Unknown(reason) => CycleOutcome::Inconclusive { reason },
            Liveness::Absent => {
                tracing::warn!("App is not running, attempting recovery");
                CycleOutcome::Recovered(self.recover())
            }
        }
    }

    fn update_in_progress(&self) -> bool {
        match inspect_update_lock(
            &self.storage.update_lock_file(),
            self.config.update_lock_timeout,
        ) {
            LockState::Held {
                contents: Some(lock),
                ..
            } => {
                tracing::info!(
                    version = %lock.version,
                    started_at = %lock.started_at,
                    "Update in progress, skipping check"
                );
                true
            }
            LockState::Held { contents: None, .. } => {
                tracing::info!("Update in progress, skipping check");
                true
            }
            LockState::Absent | LockState::Expired { .. } => false,
        }
    }

    /// App mutex first, then the process table. `snapshot` reuses a process
    /// list taken earlier in the same cycle.
    pub fn probe_liveness(&mut self, snapshot: Option<&[String]>) -> Liveness {
        match self.mutexes.is_held(&self.config.app_mutex_name) {
            Ok(true) => return Liveness::Alive(LivenessSignal::Mutex),
            Ok(false) => {}
            Err(err) => {
                tracing::warn!(error = %err, "Error checking app mutex, falling back to process list");
            }
        }

        let listed = match snapshot {
            Some(names) => is_app_listed(names, &self.config.app_executable_name),
            None => match self.processes.process_names() {
                Ok(names) => is_app_listed(&names, &self.config.app_executable_name),
                Err(err) => {
                    tracing::warn!(error = %err, "Error checking app process");
                    return Liveness::Unknown(err.to_string());
                }
            },
        };

        if listed {
            Liveness::Alive(LivenessSignal::ProcessTable)
        } else {
            Liveness::Absent
        }
    }

    fn recover(&mut self) -> RecoveryOutcome {
        // Held until this function returns, whichever branch it takes.
        let _restart_lock = match RestartLockGuard::acquire(&self.storage.restart_lock_file()) {
            Ok(Some(guard)) => guard,
            Ok(None) => {
                tracing::info!("Restart lock appeared, another recovery is in progress");
                return RecoveryOutcome::Contended;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to write restart lock, skipping recovery");
                return RecoveryOutcome::LockUnavailable;
            }
        };

        let executable = self
            .storage
            .app_executable(&self.config.app_executable_name);
        if !executable.is_file() {
            tracing::error!("App executable not found at: {}", executable.display());
            return RecoveryOutcome::ExecutableMissing(executable);
        }

        if self.update_in_progress() {
            return RecoveryOutcome::Aborted(AbortReason::UpdateStarted);
        }
        let names = match self.processes.process_names() {
            Ok(names) => names,
            Err(err) => {
                tracing::warn!(error = %err, "Error re-checking processes before relaunch");
                return RecoveryOutcome::Aborted(AbortReason::LivenessUnknown);
            }
        };
        if let Some(installer) = find_installer(&names, &self.config.installer_patterns) {
            tracing::info!("Installer started before relaunch: {}, skipping", installer);
            return RecoveryOutcome::Aborted(AbortReason::InstallerStarted);
        }
        match self.probe_liveness(Some(names.as_slice())) {
            Liveness::Absent => {}
            Liveness::Alive(signal) => {
                tracing::info!(signal = ?signal, "App came up before relaunch, skipping");
                return RecoveryOutcome::Aborted(AbortReason::AppAppeared);
            }
            Liveness::Unknown(_) => return RecoveryOutcome::Aborted(AbortReason::LivenessUnknown),
        }

        let pid = match self
            .launcher
            .launch(&executable, &self.config.recovery_args)
        {
            Ok(pid) => {
                tracing::info!("Started app with PID: {}", pid);
                pid
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to start app");
                return RecoveryOutcome::LaunchFailed;
            }
        };

        thread::sleep(self.config.launch_grace);

        match self.probe_liveness(None) {
            Liveness::Alive(_) => {
                tracing::info!("App recovery successful");
                RecoveryOutcome::Started { pid }
            }
            Liveness::Absent | Liveness::Unknown(_) => {
                tracing::warn!("App may not have started properly");
                RecoveryOutcome::Unconfirmed { pid }
            }
        }
    }
}
