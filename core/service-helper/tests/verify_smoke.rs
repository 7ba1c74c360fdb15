#![cfg(unix)]

use a1_watchdog_core::mutex::FileMutexes;
use a1_watchdog_core::NamedMutexes;
use a1_watchdog_protocol::{
    APP_EXE_NAME, LOG_FILE_NAME, PRODUCT_DIR_NAME, RESTART_LOCK_FILE, SERVICE_HELPER_MUTEX_NAME,
};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};
use tempfile::TempDir;

struct HelperGuard {
    child: Child,
}

impl Drop for HelperGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl HelperGuard {
    fn wait_for_exit(&mut self, timeout: Duration) -> ExitStatus {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if let Some(status) = self.child.try_wait().expect("Failed to poll helper") {
                return status;
            }
            sleep(Duration::from_millis(25));
        }
        panic!("Service helper did not exit within {:?}", timeout);
    }
}

/// Isolated home with every directory the helper resolves pointed inside it.
struct Sandbox {
    home: TempDir,
}

impl Sandbox {
    fn new() -> Self {
        let sandbox = Self {
            home: TempDir::new().unwrap(),
        };
        std::fs::create_dir_all(sandbox.runtime_dir()).unwrap();
        sandbox
    }

    fn data_home(&self) -> PathBuf {
        self.home.path().join("data")
    }

    fn runtime_dir(&self) -> PathBuf {
        self.home.path().join("run")
    }

    /// Where the helper keeps the app, locks and log. Linux honours
    /// `XDG_DATA_HOME`; macOS derives it from `HOME`.
    fn data_dir(&self) -> PathBuf {
        let linux = self.data_home().join(PRODUCT_DIR_NAME);
        if linux.exists() {
            return linux;
        }
        self.home
            .path()
            .join("Library")
            .join("Application Support")
            .join(PRODUCT_DIR_NAME)
    }

    fn log(&self) -> String {
        std::fs::read_to_string(self.data_dir().join(LOG_FILE_NAME)).unwrap_or_default()
    }

    fn spawn(&self, args: &[&str]) -> HelperGuard {
        let child = Command::new(env!("CARGO_BIN_EXE_a1-service-helper"))
            .args(args)
            .env("HOME", self.home.path())
            .env("XDG_DATA_HOME", self.data_home())
            .env("XDG_RUNTIME_DIR", self.runtime_dir())
            .env("TMPDIR", self.runtime_dir())
            .env_remove("RUST_LOG")
            .env_remove("A1_SERVICE_HELPER_DEBUG")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("Failed to spawn a1-service-helper");
        HelperGuard { child }
    }
}

fn write_app_stub(data_dir: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    std::fs::create_dir_all(data_dir).unwrap();
    let exe = data_dir.join(APP_EXE_NAME);
    let marker = data_dir.join("launched_with.txt");
    std::fs::write(
        &exe,
        format!("#!/bin/sh\necho \"$@\" > '{}'\n", marker.display()),
    )
    .unwrap();
    std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o755)).unwrap();
    marker
}

#[test]
fn verify_mode_without_app_logs_missing_executable() {
    let sandbox = Sandbox::new();
    let mut helper = sandbox.spawn(&["--check-once"]);

    let status = helper.wait_for_exit(Duration::from_secs(30));
    assert!(status.success());

    let log = sandbox.log();
    assert!(log.contains("Running in verify mode"), "log was: {log}");
    assert!(log.contains("App executable not found at:"), "log was: {log}");
    assert!(!sandbox.data_dir().join(RESTART_LOCK_FILE).exists());
}

#[test]
fn verify_alias_and_unknown_arguments_are_accepted() {
    let sandbox = Sandbox::new();
    let mut helper = sandbox.spawn(&["--verify", "--definitely-not-a-flag"]);

    let status = helper.wait_for_exit(Duration::from_secs(30));
    assert!(status.success());
    assert!(sandbox.log().contains("Running in verify mode"));
}

#[test]
fn second_instance_exits_without_side_effects() {
    let sandbox = Sandbox::new();
    // macOS has no runtime dir, so the helper falls back to a per-user
    // directory under TMPDIR.
    let mutexes = if cfg!(target_os = "macos") {
        FileMutexes::per_user_in(&sandbox.runtime_dir())
    } else {
        FileMutexes::new(sandbox.runtime_dir())
    };
    let _first = mutexes
        .acquire(SERVICE_HELPER_MUTEX_NAME)
        .unwrap()
        .expect("instance lock should be free");

    let mut helper = sandbox.spawn(&[]);
    let status = helper.wait_for_exit(Duration::from_secs(10));
    assert!(status.success());

    let log = sandbox.log();
    let lines: Vec<&str> = log.lines().collect();
    assert_eq!(lines.len(), 1, "log was: {log}");
    assert!(lines[0].contains("Service helper already running, exiting"));
    assert!(!sandbox.data_dir().join(RESTART_LOCK_FILE).exists());
}

#[test]
fn verify_mode_relaunches_absent_app() {
    let sandbox = Sandbox::new();
    // Create the data dir the way the helper would resolve it on this OS.
    let data_dir = if cfg!(target_os = "macos") {
        sandbox
            .home
            .path()
            .join("Library")
            .join("Application Support")
            .join(PRODUCT_DIR_NAME)
    } else {
        sandbox.data_home().join(PRODUCT_DIR_NAME)
    };
    let marker = write_app_stub(&data_dir);

    let mut helper = sandbox.spawn(&["--check-once"]);
    let status = helper.wait_for_exit(Duration::from_secs(60));
    assert!(status.success());

    let log = sandbox.log();
    assert!(log.contains("Started app with PID"), "log was: {log}");
    assert!(
        log.contains("App recovery successful") || log.contains("App may not have started properly"),
        "log was: {log}"
    );
    assert!(!data_dir.join(RESTART_LOCK_FILE).exists());

    let args = std::fs::read_to_string(marker).unwrap();
    assert_eq!(args.trim(), "--auto-start --service-restart");
}
