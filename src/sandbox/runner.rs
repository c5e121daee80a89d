//! Interpreter subprocess lifecycle for a single execution.
//!
//! # Sandbox layout
//!
//! ```text
//! <scratch_root>/exec-<execution_id>/
//!   source.py       the execution's source payload
//!   context.json    optional state blob, written before and read after the run
//! ```
//!
//! The child process runs with the sandbox directory as its working
//! directory and an environment carrying the execution ID, the agent's
//! install path, a JSON snapshot of the machine record, and the run's start
//! timestamp, so executed code gets addressable context without file parsing.
//!
//! Child failures never surface as errors: a nonzero exit, a spawn failure,
//! or a timeout all fold into an [`ExecOutput`] with `succeeded = false` and
//! a synthesized failure report, so the caller can report them to the
//! coordinator like any other result.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::process::Command;

use crate::sandbox::config::SandboxConfig;
use crate::sandbox::error::{Result, SandboxError};

/// Result of one sandboxed execution.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    /// Captured stdout then stderr, or a synthesized failure report.
    pub output: String,
    /// The context blob the executed code left behind, if any.
    pub context: Option<serde_json::Value>,
    /// True iff the child ran to completion and exited 0.
    pub succeeded: bool,
    /// Wall-clock time of the run, cleanup included.
    pub duration: Duration,
}

struct RunOutcome {
    output: String,
    context: Option<serde_json::Value>,
    succeeded: bool,
}

/// Runs execution payloads in isolated scratch directories.
#[derive(Debug, Clone)]
pub struct SandboxRunner {
    config: SandboxConfig,
    home: PathBuf,
}

impl SandboxRunner {
    pub fn new(config: SandboxConfig) -> Self {
        let home = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self { config, home }
    }

    /// Execute `code` in a fresh sandbox directory named after `execution_id`.
    ///
    /// `machine_json` is the serialized machine record exposed to the child;
    /// `context` is the machine's persisted state blob, materialized as
    /// `context.json` next to the source file before the run and read back
    /// (possibly mutated) afterwards.
    pub async fn run(
        &self,
        code: &str,
        execution_id: &str,
        machine_json: &str,
        context: Option<&serde_json::Value>,
    ) -> ExecOutput {
        let started = Instant::now();
        let dir = self.config.scratch_root.join(format!("exec-{execution_id}"));

        tracing::info!(execution_id, dir = %dir.display(), "executing in sandbox");

        let outcome = self
            .run_in_dir(&dir, code, execution_id, machine_json, context)
            .await;

        // Cleanup must never fail the execution.
        remove_sandbox_dir(&dir).await;

        let duration = started.elapsed();
        match outcome {
            Ok(RunOutcome {
                output,
                context,
                succeeded,
            }) => ExecOutput {
                output,
                context,
                succeeded,
                duration,
            },
            Err(SandboxError::Timeout(limit)) => ExecOutput {
                output: format!("Execution timed out after {} seconds.", limit.as_secs()),
                context: None,
                succeeded: false,
                duration,
            },
            Err(e) => ExecOutput {
                output: format!("Execution failed to start: {e}"),
                context: None,
                succeeded: false,
                duration,
            },
        }
    }

    async fn run_in_dir(
        &self,
        dir: &Path,
        code: &str,
        execution_id: &str,
        machine_json: &str,
        context: Option<&serde_json::Value>,
    ) -> Result<RunOutcome> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| SandboxError::Setup {
                reason: format!("{}: {e}", dir.display()),
            })?;

        let source_path = dir.join("source.py");
        tokio::fs::write(&source_path, code)
            .await
            .map_err(|e| SandboxError::Setup {
                reason: format!("{}: {e}", source_path.display()),
            })?;

        let context_path = dir.join("context.json");
        if let Some(context) = context {
            let text = serde_json::to_string_pretty(context).map_err(|e| SandboxError::Setup {
                reason: format!("context serialization: {e}"),
            })?;
            tokio::fs::write(&context_path, text)
                .await
                .map_err(|e| SandboxError::Setup {
                    reason: format!("{}: {e}", context_path.display()),
                })?;
        }

        let mut command = Command::new(&self.config.interpreter);
        command
            .arg(&source_path)
            .current_dir(dir)
            .env("PYTHONIOENCODING", "utf-8")
            .env("PYTHONUTF8", "1")
            .env("OUTPOST_HOME", &self.home)
            .env("EXECUTION_ID", execution_id)
            .env("MACHINE_JSON", machine_json)
            .env("STARTED_AT", Utc::now().to_rfc3339())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match self.config.timeout {
            Some(limit) => tokio::time::timeout(limit, command.output())
                .await
                .map_err(|_| SandboxError::Timeout(limit))?,
            None => command.output().await,
        }
        .map_err(|e| SandboxError::Spawn {
            interpreter: self.config.interpreter.clone(),
            reason: e.to_string(),
        })?;

        let stdout = bounded_lossy(&output.stdout, self.config.max_output_bytes);
        let stderr = bounded_lossy(&output.stderr, self.config.max_output_bytes);
        let captured = if stderr.is_empty() {
            stdout
        } else if stdout.is_empty() {
            stderr
        } else {
            format!("{stdout}\n{stderr}")
        };

        let succeeded = output.status.success();
        let text = if succeeded {
            captured
        } else {
            match output.status.code() {
                Some(code) => format!("Process exited with code {code}\n\n{captured}"),
                None => format!("Process terminated by signal\n\n{captured}"),
            }
        };

        let updated_context = read_context(&context_path).await;

        Ok(RunOutcome {
            output: text,
            context: updated_context,
            succeeded,
        })
    }
}

/// Read the context file back after a run. Missing file means the code left
/// no state; an unparseable file is dropped rather than persisted.
async fn read_context(path: &Path) -> Option<serde_json::Value> {
    let text = tokio::fs::read_to_string(path).await.ok()?;
    match serde_json::from_str(&text) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unparseable context file");
            None
        }
    }
}

async fn remove_sandbox_dir(dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(dir).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(dir = %dir.display(), error = %e, "failed to remove sandbox directory");
        }
    }
}

/// Decode captured bytes, truncating at a char boundary past the limit.
fn bounded_lossy(bytes: &[u8], limit: usize) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= limit {
        return text.into_owned();
    }
    let mut cut = limit;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}\n... [output truncated]", &text[..cut])
}
