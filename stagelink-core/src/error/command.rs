//! Command (request/response) error types.
//!
//! A command either resolves with the device's response payload or fails with
//! one of these: the device rejected it with a stated reason, no response
//! arrived before the deadline, the response payload did not decode, or the
//! transport was down.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::NetworkError;

/// Error type for request/response commands.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandError {
    /// The device answered with a non-OK state and a failure reason.
    #[error("[Command] Rejected by device: {reason}")]
    Rejected {
        /// The device's stated failure reason.
        reason: String,
    },

    /// No response arrived before the request deadline.
    #[error("[Command] No response after {timeout_ms}ms")]
    Timeout {
        /// Request timeout in milliseconds.
        timeout_ms: u64,
    },

    /// The response payload did not match the expected shape.
    #[error("[Command] Response decode failed: {reason}")]
    Decode {
        /// Reason the payload failed to decode.
        reason: String,
    },

    /// The underlying transport failed.
    #[error("{0}")]
    Transport(#[from] NetworkError),
}

impl CommandError {
    /// Returns true if this error is recoverable (can be retried).
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Rejected { .. } | Self::Decode { .. } => false,
            Self::Timeout { .. } => true,
            Self::Transport(e) => e.is_recoverable(),
        }
    }

    /// Returns true if this is a request timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns true if the device explicitly rejected the request.
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}
