//! Error types for process lookup and control

use std::time::Duration;
use thiserror::Error;

/// Errors returned by lookup, accessor and control operations
#[derive(Error, Debug)]
pub enum ProcessError {
    /// The process exited, its PID was recycled, or it never existed
    #[error("process not found: pid {pid}")]
    NotFound { pid: u32 },

    /// A lookup that pins no PID found nothing
    #[error("no process matches {filter}")]
    NoMatch { filter: String },

    #[error("permission denied to {operation} process: pid {pid}")]
    PermissionDenied { pid: u32, operation: &'static str },

    #[error("unsupported on this platform: {0}")]
    Unsupported(String),

    #[error("process {pid} still running after {waited:?}")]
    StillRunning { pid: u32, waited: Duration },

    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    #[error("failed to launch {command:?}: {source}")]
    Launch {
        command: Vec<String>,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to signal process {pid}: {reason}")]
    Signal { pid: u32, reason: String },
}

impl ProcessError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProcessError::NotFound { .. } | ProcessError::NoMatch { .. })
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, ProcessError::PermissionDenied { .. })
    }
}

pub type Result<T> = std::result::Result<T, ProcessError>;
