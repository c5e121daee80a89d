//! Agent configuration assembled from the environment.
//!
//! Everything is overridable via `OUTPOST_*` environment variables; the
//! bearer token is the only required value. `.env` files are honored by the
//! binary before this module runs.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::sandbox::SandboxConfig;

/// Default coordinator endpoint.
pub const DEFAULT_COORDINATOR_URL: &str = "https://hub.outpost.sh";

/// Runtime configuration for the agent process.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the coordinator.
    pub coordinator_url: String,
    /// Opaque bearer token identifying this machine.
    pub token: SecretString,
    /// Interval between liveness ticks.
    pub heartbeat_interval: Duration,
    /// Fixed delay before re-initializing after a failed cycle.
    pub reconnect_backoff: Duration,
    /// Directory for the process and error log files.
    pub log_dir: PathBuf,
    /// Sandbox settings for executed code.
    pub sandbox: SandboxConfig,
}

impl Config {
    /// Build configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let token = lookup("OUTPOST_TOKEN")
            .filter(|t| !t.is_empty())
            .map(SecretString::from)
            .ok_or_else(|| ConfigError::MissingVar {
                name: "OUTPOST_TOKEN".to_string(),
            })?;

        let coordinator_url =
            lookup("OUTPOST_COORDINATOR_URL").unwrap_or_else(|| DEFAULT_COORDINATOR_URL.to_string());

        let heartbeat_interval =
            Duration::from_secs(parse_var(&lookup, "OUTPOST_HEARTBEAT_SECS", 120)?);
        let reconnect_backoff = Duration::from_secs(parse_var(&lookup, "OUTPOST_BACKOFF_SECS", 10)?);

        // 0 disables the execution timeout.
        let timeout_secs: u64 = parse_var(&lookup, "OUTPOST_EXEC_TIMEOUT_SECS", 120)?;
        let mut sandbox = SandboxConfig::default()
            .with_timeout((timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)));
        if let Some(dir) = lookup("OUTPOST_SCRATCH_DIR") {
            sandbox = sandbox.with_scratch_root(dir);
        }
        if let Some(interpreter) = lookup("OUTPOST_INTERPRETER") {
            sandbox = sandbox.with_interpreter(interpreter);
        }

        let log_dir = lookup("OUTPOST_LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(default_log_dir);

        Ok(Self {
            coordinator_url,
            token,
            heartbeat_interval,
            reconnect_backoff,
            log_dir,
            sandbox,
        })
    }
}

fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("outpost"))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidVar {
            name: name.to_string(),
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}
