//! Error types for the agent core.

/// Errors raised by coordinator gateway calls.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Transport-level failure: connect refused, DNS, timeout, dropped stream.
    #[error("connection failed: {reason}")]
    Connect { reason: String },

    /// The coordinator rejected the bearer token.
    #[error("authentication rejected by coordinator")]
    Auth,

    /// The coordinator answered with a non-success status.
    #[error("coordinator returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// A record the agent depends on does not exist.
    #[error("record not found: {what}")]
    NotFound { what: String },

    /// The coordinator's response could not be decoded.
    #[error("invalid coordinator response: {reason}")]
    Decode { reason: String },
}

impl GatewayError {
    /// True for transient network conditions that warrant a quiet retry
    /// rather than an error-level log entry.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, GatewayError::Connect { .. })
    }
}

/// Errors raised while assembling configuration from the environment.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {name}")]
    MissingVar { name: String },

    #[error("invalid value for {name}: {reason}")]
    InvalidVar { name: String, reason: String },
}
