//! Network-related error types.
//!
//! Covers socket open failures, unexpected closes, and protocol-level send
//! failures. These are recovered locally by the reconnect loop and never
//! surface to command callers except as timeouts.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Network error type covering connection failures, timeouts, and socket
/// protocol errors.
///
/// # Examples
///
/// ```
/// use stagelink_core::error::NetworkError;
///
/// let error = NetworkError::ConnectionFailed {
///     reason: "Connection refused".to_string(),
/// };
/// assert!(error.to_string().contains("Connection refused"));
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkError {
    /// Connection to the device failed.
    #[error("[Network] Connection failed: {reason}")]
    ConnectionFailed {
        /// Reason for the connection failure.
        reason: String,
    },

    /// Connection attempt timed out.
    #[error("[Network] Connection timeout after {timeout_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds.
        timeout_ms: u64,
    },

    /// Connection was closed unexpectedly.
    #[error("[Network] Connection closed: {reason}")]
    ConnectionClosed {
        /// Reason for the connection closure.
        reason: String,
    },

    /// Socket protocol error (framing, serialization, transport).
    #[error("[Network] Protocol error: {reason}")]
    Protocol {
        /// Reason for the protocol error.
        reason: String,
    },

    /// The client is not connected to the device.
    #[error("[Network] Not connected")]
    NotConnected,
}

impl NetworkError {
    /// Returns true if this error is recoverable (can be retried).
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. }
                | Self::Timeout { .. }
                | Self::ConnectionClosed { .. }
                | Self::NotConnected
        )
    }
}
