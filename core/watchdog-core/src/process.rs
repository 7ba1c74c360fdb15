//! Process table snapshots for liveness and installer detection.
//!
//! Matching is done on executable names only. Names are compared
//! case-insensitively because Windows reports them with whatever casing the
//! installer chose (`A1-Tools-Setup-2.4.1.exe`, `a1_tools.EXE`).

use sysinfo::{ProcessRefreshKind, ProcessStatus, System};

use crate::error::{Result, WatchdogError};

/// Source of running process names.
pub trait ProcessTable {
    /// Names of all live processes visible to the current user.
    fn process_names(&mut self) -> Result<Vec<String>>;
}

/// [`ProcessTable`] backed by sysinfo.
///
/// The `System` is kept between cycles so repeated refreshes only pick up
/// the delta.
pub struct SystemProcessTable {
    sys: System,
}

impl SystemProcessTable {
    pub fn new() -> Self {
        Self { sys: System::new() }
    }
}

impl Default for SystemProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable for SystemProcessTable {
    fn process_names(&mut self) -> Result<Vec<String>> {
        self.sys
            .refresh_processes_specifics(ProcessRefreshKind::new());

        // Exited-but-unreaped children stay in the table on unix.
        let names: Vec<String> = self
            .sys
            .processes()
            .values()
            .filter(|process| process.status() != ProcessStatus::Zombie)
            .map(|process| process.name().to_string())
            .collect();

        // The helper itself is always running, so an empty table means the
        // snapshot failed rather than that nothing is alive.
        if names.is_empty() {
            return Err(WatchdogError::ProcessEnumeration(
                "process snapshot returned no entries".to_string(),
            ));
        }
        Ok(names)
    }
}

/// First process name containing one of `patterns` (already lowercase).
pub fn find_installer<'a>(names: &'a [String], patterns: &[String]) -> Option<&'a str> {
    names
        .iter()
        .find(|name| {
            let lower = name.to_lowercase();
            patterns.iter().any(|pattern| lower.contains(pattern.as_str()))
        })
        .map(String::as_str)
}

/// Whether a process with exactly `executable_name` is running.
pub fn is_app_listed(names: &[String], executable_name: &str) -> bool {
    names
        .iter()
        .any(|name| name.eq_ignore_ascii_case(executable_name))
}
