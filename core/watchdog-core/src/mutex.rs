//! Named, system-wide mutexes.
//!
//! Two names matter: the helper's own mutex (held for the helper's lifetime to
//! keep a single instance per user) and the app's mutex (only probed, never
//! held). On Windows these are kernel mutex objects. On unix they are
//! `flock(2)` locks on `<runtime dir>/<name>.lock` (or a per-user directory
//! under the temp dir when there is no runtime dir), which the kernel releases
//! when the holder exits, matching abandoned-mutex semantics.

use crate::error::Result;

pub trait NamedMutexes {
    /// Releases ownership when dropped.
    type Guard;

    /// Takes ownership of `name`, or `Ok(None)` if another process owns it.
    fn acquire(&self, name: &str) -> Result<Option<Self::Guard>>;

    /// Whether some process currently owns `name`. Never takes ownership
    /// beyond the duration of the probe.
    fn is_held(&self, name: &str) -> Result<bool>;
}

#[cfg(unix)]
pub use unix::{FileMutexGuard, FileMutexes};
#[cfg(windows)]
pub use windows_impl::{WindowsMutexGuard, WindowsMutexes};

#[cfg(unix)]
pub type SystemMutexes = FileMutexes;
#[cfg(windows)]
pub type SystemMutexes = WindowsMutexes;

// =============================================================================
// Unix: flock files
// =============================================================================

#[cfg(unix)]
mod unix {
    use fs2::FileExt;
    use fs_err as fs;
    use std::io::{ErrorKind, Write};
    use std::path::{Path, PathBuf};

    use super::NamedMutexes;
    use crate::error::{Result, WatchdogError};

    #[derive(Debug, Clone)]
    pub struct FileMutexes {
        dir: PathBuf,
    }

    impl FileMutexes {
        pub fn new(dir: impl Into<PathBuf>) -> Self {
            Self { dir: dir.into() }
        }

        /// Per-user runtime dir, falling back to a per-user directory under
        /// the temp dir (which may be shared between users).
        pub fn system() -> Self {
            match dirs::runtime_dir() {
                Some(dir) => Self::new(dir),
                None => Self::per_user_in(&std::env::temp_dir()),
            }
        }

        pub fn per_user_in(base: &Path) -> Self {
            // SAFETY: getuid has no preconditions and cannot fail.
            #[allow(unsafe_code)]
            let uid = unsafe { libc::getuid() };
            Self::new(per_user_dir(base, uid))
        }

        pub fn path_for(&self, name: &str) -> PathBuf {
            self.dir.join(format!("{}.lock", name))
        }
    }

    /// Keeps the flock alive. The file itself is left behind on drop: removing
    /// it would let a waiter lock the unlinked inode while a newcomer locks a
    /// fresh one.
    #[derive(Debug)]
    pub struct FileMutexGuard {
        _file: fs::File,
        path: PathBuf,
    }

    impl FileMutexGuard {
        pub fn path(&self) -> &Path {
            &self.path
        }
    }

    fn per_user_dir(base: &Path, uid: u32) -> PathBuf {
        base.join(format!("a1-tools-{}", uid))
    }

    fn is_contended(err: &std::io::Error) -> bool {
        err.kind() == fs2::lock_contended_error().kind() || err.kind() == ErrorKind::WouldBlock
    }

    impl NamedMutexes for FileMutexes {
        type Guard = FileMutexGuard;

        fn acquire(&self, name: &str) -> Result<Option<FileMutexGuard>> {
            fs::create_dir_all(&self.dir)
                .map_err(|err| WatchdogError::named_mutex(name, err))?;
            let path = self.path_for(name);
            let mut file = fs::OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)
                .map_err(|err| WatchdogError::named_mutex(name, err))?;

            match FileExt::try_lock_exclusive(file.file()) {
                Ok(()) => {}
                Err(err) if is_contended(&err) => return Ok(None),
                Err(err) => return Err(WatchdogError::named_mutex(name, err)),
            }

            // Holder pid is informational only.
            if file.file().set_len(0).is_ok() {
                let _ = write!(file, "{}", std::process::id());
            }

            Ok(Some(FileMutexGuard { _file: file, path }))
        }

        fn is_held(&self, name: &str) -> Result<bool> {
            let file = match fs::File::open(self.path_for(name)) {
                Ok(file) => file,
                Err(err) if err.kind() == ErrorKind::NotFound => return Ok(false),
                Err(err) => return Err(WatchdogError::named_mutex(name, err)),
            };

            match FileExt::try_lock_shared(file.file()) {
                Ok(()) => {
                    let _ = FileExt::unlock(file.file());
                    Ok(false)
                }
                Err(err) if is_contended(&err) => Ok(true),
                Err(err) => Err(WatchdogError::named_mutex(name, err)),
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use tempfile::tempdir;

        #[test]
        fn test_acquire_then_second_acquire_fails() {
            let temp = tempdir().unwrap();
            let mutexes = FileMutexes::new(temp.path());

            let guard = mutexes.acquire("A1ToolsServiceHelperMutex").unwrap();
            assert!(guard.is_some());
            assert!(mutexes
                .acquire("A1ToolsServiceHelperMutex")
                .unwrap()
                .is_none());
        }

        #[test]
        fn test_release_on_drop_allows_reacquire() {
            let temp = tempdir().unwrap();
            let mutexes = FileMutexes::new(temp.path());

            let guard = mutexes.acquire("helper").unwrap().unwrap();
            drop(guard);
            assert!(mutexes.acquire("helper").unwrap().is_some());
        }

        #[test]
        fn test_is_held_reflects_ownership() {
            let temp = tempdir().unwrap();
            let mutexes = FileMutexes::new(temp.path());

            assert!(!mutexes.is_held("A1ToolsSingleInstanceMutex").unwrap());

            let guard = mutexes.acquire("A1ToolsSingleInstanceMutex").unwrap().unwrap();
            assert!(mutexes.is_held("A1ToolsSingleInstanceMutex").unwrap());

            drop(guard);
            // File left behind, but nobody holds it.
            assert!(temp.path().join("A1ToolsSingleInstanceMutex.lock").exists());
            assert!(!mutexes.is_held("A1ToolsSingleInstanceMutex").unwrap());
        }

        #[test]
        fn test_probe_does_not_create_file() {
            let temp = tempdir().unwrap();
            let mutexes = FileMutexes::new(temp.path());
            assert!(!mutexes.is_held("app").unwrap());
            assert!(!mutexes.path_for("app").exists());
        }

        #[test]
        fn test_temp_fallback_is_per_user() {
            let base = Path::new("/tmp");
            assert_eq!(per_user_dir(base, 1000), PathBuf::from("/tmp/a1-tools-1000"));
            assert_ne!(per_user_dir(base, 1000), per_user_dir(base, 1001));
        }

        #[test]
        fn test_users_do_not_share_temp_fallback_locks() {
            let temp = tempdir().unwrap();
            let alice = FileMutexes::new(per_user_dir(temp.path(), 1000));
            let bob = FileMutexes::new(per_user_dir(temp.path(), 1001));

            let _app = alice.acquire("A1ToolsSingleInstanceMutex").unwrap().unwrap();
            assert!(!bob.is_held("A1ToolsSingleInstanceMutex").unwrap());
            assert!(bob.acquire("A1ToolsSingleInstanceMutex").unwrap().is_some());
        }

        #[test]
        fn test_per_user_in_uses_current_uid() {
            let temp = tempdir().unwrap();
            let mutexes = FileMutexes::per_user_in(temp.path());
            let uid = unsafe { libc::getuid() };
            assert_eq!(
                mutexes.path_for("helper"),
                temp.path().join(format!("a1-tools-{}", uid)).join("helper.lock")
            );
        }

        #[test]
        fn test_guard_records_holder_pid() {
            let temp = tempdir().unwrap();
            let mutexes = FileMutexes::new(temp.path().join("run"));
            let guard = mutexes.acquire("helper").unwrap().unwrap();
            let contents = std::fs::read_to_string(guard.path()).unwrap();
            assert_eq!(contents, std::process::id().to_string());
        }
    }
}

// =============================================================================
// Windows: kernel mutex objects
// =============================================================================

#[cfg(windows)]
mod windows_impl {
    use windows::core::PCWSTR;
    use windows::Win32::Foundation::{
        CloseHandle, GetLastError, ERROR_ALREADY_EXISTS, ERROR_FILE_NOT_FOUND, HANDLE,
    };
    use windows::Win32::System::Threading::{
        CreateMutexW, OpenMutexW, ReleaseMutex, SYNCHRONIZATION_SYNCHRONIZE,
    };

    use super::NamedMutexes;
    use crate::error::{Result, WatchdogError};

    #[derive(Debug, Default, Clone, Copy)]
    pub struct WindowsMutexes;

    impl WindowsMutexes {
        pub fn system() -> Self {
            Self
        }
    }

    fn wide(name: &str) -> Vec<u16> {
        name.encode_utf16().chain(std::iter::once(0)).collect()
    }

    /// Owned mutex handle; released and closed on drop.
    #[derive(Debug)]
    pub struct WindowsMutexGuard {
        handle: HANDLE,
    }

    // SAFETY: HANDLE is an opaque kernel handle; it is released on the thread
    // that acquired it because the helper holds it on the main thread.
    unsafe impl Send for WindowsMutexGuard {}

    impl Drop for WindowsMutexGuard {
        fn drop(&mut self) {
            // SAFETY: handle came from a successful CreateMutexW with initial ownership.
            unsafe {
                let _ = ReleaseMutex(self.handle);
                let _ = CloseHandle(self.handle);
            }
        }
    }

    impl NamedMutexes for WindowsMutexes {
        type Guard = WindowsMutexGuard;

        fn acquire(&self, name: &str) -> Result<Option<WindowsMutexGuard>> {
            let wide_name = wide(name);
            // SAFETY: wide_name is NUL-terminated and outlives the call.
            let handle = unsafe { CreateMutexW(None, true, PCWSTR(wide_name.as_ptr())) }
                .map_err(|err| WatchdogError::named_mutex(name, err))?;

            // SAFETY: no other Win32 call between CreateMutexW and this read.
            if unsafe { GetLastError() } == ERROR_ALREADY_EXISTS {
                // SAFETY: handle is valid and not owned by us.
                unsafe {
                    let _ = CloseHandle(handle);
                }
                return Ok(None);
            }

            Ok(Some(WindowsMutexGuard { handle }))
        }

        fn is_held(&self, name: &str) -> Result<bool> {
            let wide_name = wide(name);
            // SAFETY: wide_name is NUL-terminated and outlives the call.
            match unsafe {
                OpenMutexW(SYNCHRONIZATION_SYNCHRONIZE, false, PCWSTR(wide_name.as_ptr()))
            } {
                Ok(handle) => {
                    // SAFETY: handle was just opened and is closed exactly once.
                    unsafe {
                        let _ = CloseHandle(handle);
                    }
                    Ok(true)
                }
                Err(err) if err.code() == ERROR_FILE_NOT_FOUND.to_hresult() => Ok(false),
                Err(err) => Err(WatchdogError::named_mutex(name, err)),
            }
        }
    }
}
