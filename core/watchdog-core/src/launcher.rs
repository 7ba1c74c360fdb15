//! Starting the app as an independent process.
//!
//! The relaunched app must outlive the helper, so it is spawned detached: no
//! inherited stdio, its own session (unix) or process group without a console
//! (Windows). The helper never waits on it.

use std::path::Path;
use std::process::{Child, Command, Stdio};

use crate::error::{Result, WatchdogError};

pub trait Launcher {
    /// Starts `executable` with `args` and returns its pid.
    fn launch(&mut self, executable: &Path, args: &[String]) -> Result<u32>;
}

#[cfg(windows)]
const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
#[cfg(windows)]
const DETACHED_PROCESS: u32 = 0x0000_0008;

/// Spawns with the platform's detach flags.
///
/// Child handles are retained only so exited children can be reaped on unix;
/// the helper never blocks on them.
#[derive(Debug, Default)]
pub struct DetachedLauncher {
    children: Vec<Child>,
}

impl DetachedLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    fn reap_exited(&mut self) {
        self.children
            .retain_mut(|child| !matches!(child.try_wait(), Ok(Some(_)) | Err(_)));
    }
}

impl Launcher for DetachedLauncher {
    fn launch(&mut self, executable: &Path, args: &[String]) -> Result<u32> {
        self.reap_exited();

        let mut cmd = Command::new(executable);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        if let Some(dir) = executable.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            cmd.current_dir(dir);
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // SAFETY: setsid is async-signal-safe and touches no parent state.
            #[allow(unsafe_code)]
            unsafe {
                cmd.pre_exec(|| {
                    libc::setsid();
                    Ok(())
                });
            }
        }

        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            cmd.creation_flags(CREATE_NEW_PROCESS_GROUP | DETACHED_PROCESS);
        }

        let child = cmd.spawn().map_err(|source| WatchdogError::LaunchFailed {
            path: executable.to_path_buf(),
            source,
        })?;
        let pid = child.id();
        self.children.push(child);
        Ok(pid)
    }
}
