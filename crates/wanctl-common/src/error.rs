//! Error types for wanctl

use thiserror::Error;

/// wanctl error type
#[derive(Error, Debug)]
pub enum WanctlError {
    /// Configuration invariant violated (fatal at startup)
    #[error("config error: {0}")]
    Config(String),

    /// Router transport failed before a command could complete
    #[error("transport error ({transport}): {message}")]
    Transport {
        /// Transport name (ssh, rest)
        transport: &'static str,
        /// Failure detail
        message: String,
        /// Whether a retry may succeed
        retryable: bool,
    },

    /// Router accepted the connection but the command failed or did not verify
    #[error("router command failed: {0}")]
    Router(String),

    /// Measurement probe failed (ping, CAKE read)
    #[error("probe failed: {message}")]
    Probe {
        /// Failure detail
        message: String,
        /// Whether a retry may succeed
        retryable: bool,
    },

    /// Persisted state could not be decoded
    #[error("state corrupt: {0}")]
    StateCorrupt(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WanctlError {
    /// Build a retryable transport error
    pub fn transient(transport: &'static str, message: impl Into<String>) -> Self {
        Self::Transport {
            transport,
            message: message.into(),
            retryable: true,
        }
    }

    /// Build a non-retryable transport error (authentication, syntax)
    pub fn fatal_transport(transport: &'static str, message: impl Into<String>) -> Self {
        Self::Transport {
            transport,
            message: message.into(),
            retryable: false,
        }
    }

    /// Timeouts and connection resets retry; authentication and syntax errors do not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { retryable, .. } | Self::Probe { retryable, .. } => *retryable,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::Interrupted
            ),
            Self::Config(_) | Self::Router(_) | Self::StateCorrupt(_) | Self::Json(_) => false,
        }
    }
}

/// Result type for wanctl
pub type WanctlResult<T> = Result<T, WanctlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_taxonomy() {
        assert!(WanctlError::transient("ssh", "connection reset").is_retryable());
        assert!(!WanctlError::fatal_transport("rest", "401 Unauthorized").is_retryable());
        assert!(!WanctlError::Router("syntax error".into()).is_retryable());
        assert!(!WanctlError::Config("bad floors".into()).is_retryable());

        let timeout = WanctlError::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "t"));
        assert!(timeout.is_retryable());
        let denied = WanctlError::Io(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "d"));
        assert!(!denied.is_retryable());
    }
}
