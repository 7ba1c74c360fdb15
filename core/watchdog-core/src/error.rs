//! Error types for watchdog operations.
//!
//! The poll cycle never propagates these; every probe result is logged and
//! mapped onto the conservative outcome by [`crate::watchdog`].

use std::path::PathBuf;

/// All errors that can occur while probing or acting on system state.
#[derive(Debug, thiserror::Error)]
pub enum WatchdogError {
    // ─────────────────────────────────────────────────────────────────────
    // Environment
    // ─────────────────────────────────────────────────────────────────────
    #[error("Local application data directory could not be determined")]
    DataDirNotFound,

    // ─────────────────────────────────────────────────────────────────────
    // I/O
    // ─────────────────────────────────────────────────────────────────────
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON parsing error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    // ─────────────────────────────────────────────────────────────────────
    // OS probes
    // ─────────────────────────────────────────────────────────────────────
    #[error("Process enumeration failed: {0}")]
    ProcessEnumeration(String),

    #[error("Named mutex {name} unavailable: {details}")]
    NamedMutex { name: String, details: String },

    // ─────────────────────────────────────────────────────────────────────
    // Recovery
    // ─────────────────────────────────────────────────────────────────────
    #[error("App executable not found at: {}", .0.display())]
    ExecutableMissing(PathBuf),

    #[error("Failed to start {}: {source}", .path.display())]
    LaunchFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl WatchdogError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        WatchdogError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn named_mutex(name: &str, details: impl std::fmt::Display) -> Self {
        WatchdogError::NamedMutex {
            name: name.to_string(),
            details: details.to_string(),
        }
    }
}

/// Convenience type alias for Results using WatchdogError.
pub type Result<T> = std::result::Result<T, WatchdogError>;
