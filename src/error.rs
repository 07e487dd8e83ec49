//! Kernel error types
//!
//! Only precondition violations surface as `KernelError`. Transport failures
//! are caught at the dispatcher boundary and never leave it as errors.

use std::time::Duration;

/// Errors raised by the orchestration core
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    #[error("Capability already registered: {0}")]
    DuplicateCapability(String),

    #[error("Capability not found: {0}")]
    CapabilityNotFound(String),

    #[error("Task must not be empty")]
    EmptyTask,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures inside a single transport call
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to spawn process: {0}")]
    Spawn(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Process exited with code {code:?}: {stderr}")]
    NonZeroExit { code: Option<i32>, stderr: String },

    #[error("Unparseable response: {0}")]
    Parse(String),

    #[error("Builtin handler failed: {0}")]
    Builtin(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        TransportError::Http(e.to_string())
    }
}

pub type KernelResult<T> = std::result::Result<T, KernelError>;
