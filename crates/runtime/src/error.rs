//! Error types for the extension automation runtime.

use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the extension automation runtime.
#[derive(Debug, Error)]
pub enum Error {
    /// Protocol-level error (JSON-RPC).
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Error reported by the automation host, carried verbatim.
    #[error("{name}: {message}")]
    Remote {
        /// Error type name (e.g., "TimeoutError", "TargetClosedError")
        name: String,
        /// Human-readable error message
        message: String,
        /// Host-side stack trace (if available)
        stack: Option<String>,
    },

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Timeout waiting for operation.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Object not found in the connection registry.
    #[error("Object not found: {guid}{}", expected.map(|t| format!(" (expected {})", t)).unwrap_or_default())]
    ObjectNotFound {
        guid: String,
        expected: Option<&'static str>,
    },

    /// Connection channel closed unexpectedly.
    #[error("Channel closed unexpectedly")]
    ChannelClosed,
}

impl Error {
    /// Returns the error name if this is a Remote error.
    pub fn error_name(&self) -> Option<&str> {
        match self {
            Error::Remote { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Returns true if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Timeout(_) => true,
            Error::Remote { name, .. } => name == "TimeoutError",
            _ => false,
        }
    }

    /// Returns true if the host reported the target as already closed.
    pub fn is_target_closed(&self) -> bool {
        matches!(self, Error::Remote { name, .. } if name == "TargetClosedError")
    }
}
