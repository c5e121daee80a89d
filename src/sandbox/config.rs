//! Configuration for the subprocess execution sandbox.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the sandbox system.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Directory under which per-execution scratch directories are created.
    pub scratch_root: PathBuf,
    /// Interpreter invoked against the materialized source file.
    pub interpreter: String,
    /// Wall-clock bound for a single execution. `None` disables the bound.
    pub timeout: Option<Duration>,
    /// Maximum bytes of captured output per stream before truncation.
    pub max_output_bytes: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            scratch_root: std::env::temp_dir(),
            interpreter: "python3".to_string(),
            timeout: Some(Duration::from_secs(120)),
            max_output_bytes: 64 * 1024,
        }
    }
}

impl SandboxConfig {
    /// Set the scratch root.
    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = root.into();
        self
    }

    /// Set the interpreter.
    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = interpreter.into();
        self
    }

    /// Set the execution timeout. `None` disables it.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}
