//! Error types for the subprocess execution sandbox.

use std::time::Duration;

/// Errors that can occur while materializing or running a sandbox.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// The scratch directory or one of its files could not be created.
    #[error("failed to materialize sandbox: {reason}")]
    Setup { reason: String },

    /// The interpreter process could not be started.
    #[error("failed to spawn interpreter '{interpreter}': {reason}")]
    Spawn { interpreter: String, reason: String },

    /// The execution exceeded its wall-clock bound.
    #[error("execution timed out after {0:?}")]
    Timeout(Duration),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for sandbox operations.
pub type Result<T> = std::result::Result<T, SandboxError>;
