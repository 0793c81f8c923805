//! Error types and handling framework.
//!
//! The error system is organized hierarchically:
//! - `StagelinkError` - Top-level error type
//!   - `NetworkError` - Socket and connection errors
//!   - `CommandError` - Request/response command errors
//!   - `LoadError` - Design load coordination errors
//!
//! Transport failures are handled internally by the reconnect loop and reach
//! callers only as command timeouts; command and load errors carry the
//! device's stated failure reason.

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod command;
mod load;
mod network;

pub use command::CommandError;
pub use load::LoadError;
pub use network::NetworkError;

/// Top-level error type for the StageLink client.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StagelinkError {
    /// Socket or connection error.
    #[error("{0}")]
    Network(#[from] NetworkError),

    /// Request/response command error.
    #[error("{0}")]
    Command(#[from] CommandError),

    /// Design load error.
    #[error("{0}")]
    Load(#[from] LoadError),
}

impl StagelinkError {
    /// Returns true if this error is recoverable (can be retried).
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Network(e) => e.is_recoverable(),
            Self::Command(e) => e.is_recoverable(),
            Self::Load(e) => e.is_recoverable(),
        }
    }

    /// Returns the error category as a string.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Command(_) => "command",
            Self::Load(_) => "load",
        }
    }

    /// Returns the inner network error, if this is a network error.
    #[must_use]
    pub fn as_network_error(&self) -> Option<&NetworkError> {
        match self {
            Self::Network(e) => Some(e),
            _ => None,
        }
    }

    /// Returns the inner command error, if this is a command error.
    #[must_use]
    pub fn as_command_error(&self) -> Option<&CommandError> {
        match self {
            Self::Command(e) => Some(e),
            _ => None,
        }
    }
}

/// A specialized Result type for StageLink operations.
pub type Result<T> = std::result::Result<T, StagelinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_error_conversion() {
        let network_err = NetworkError::Timeout { timeout_ms: 5000 };
        let err: StagelinkError = network_err.clone().into();
        assert_eq!(err.category(), "network");
        assert_eq!(err.as_network_error(), Some(&network_err));
        assert!(err.as_command_error().is_none());
    }

    #[test]
    fn test_command_error_conversion() {
        let command_err = CommandError::Rejected {
            reason: "unknown control".to_string(),
        };
        let err: StagelinkError = command_err.clone().into();
        assert_eq!(err.category(), "command");
        assert_eq!(err.as_command_error(), Some(&command_err));
    }

    #[test]
    fn test_load_error_conversion() {
        let load_err = LoadError::Unavailable {
            reason: "no design loaded".to_string(),
        };
        let err: StagelinkError = load_err.into();
        assert_eq!(err.category(), "load");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_is_recoverable_delegates() {
        let recoverable = StagelinkError::Network(NetworkError::ConnectionClosed {
            reason: "reset by peer".to_string(),
        });
        assert!(recoverable.is_recoverable());

        let terminal = StagelinkError::Command(CommandError::Rejected {
            reason: "denied".to_string(),
        });
        assert!(!terminal.is_recoverable());
    }

    #[test]
    fn test_serde_roundtrip() {
        let err = StagelinkError::Network(NetworkError::Timeout { timeout_ms: 3000 });
        let json = serde_json::to_string(&err).unwrap();
        let parsed: StagelinkError = serde_json::from_str(&json).unwrap();
        assert_eq!(err, parsed);
    }

    #[test]
    fn test_display() {
        let err = StagelinkError::Command(CommandError::Timeout { timeout_ms: 60_000 });
        assert!(err.to_string().contains("60000ms"));
    }
}
