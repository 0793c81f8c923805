//! Design load error types.
//!
//! A failed load is terminal: every waiter of the in-flight fetch, and every
//! later caller until the next invalidation, observes the same error.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::CommandError;

/// Error type for single-flight design loads.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadError {
    /// The device reported that nothing is available to load.
    #[error("[Load] Design unavailable: {reason}")]
    Unavailable {
        /// The device's stated reason.
        reason: String,
    },

    /// The underlying fetch command failed after its retry budget.
    #[error("{0}")]
    Fetch(#[from] CommandError),
}

impl LoadError {
    /// Returns true if this error is recoverable (can be retried).
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Unavailable { .. } => false,
            Self::Fetch(e) => e.is_recoverable(),
        }
    }

    /// Returns true if the device reported nothing to load.
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable() {
        let error = LoadError::Unavailable {
            reason: "no design loaded".to_string(),
        };
        assert!(error.is_unavailable());
        assert!(!error.is_recoverable());
        assert!(error.to_string().contains("no design loaded"));
    }

    #[test]
    fn test_fetch_conversion() {
        let error: LoadError = CommandError::Timeout { timeout_ms: 60_000 }.into();
        assert!(!error.is_unavailable());
        assert!(error.is_recoverable());
    }

    #[test]
    fn test_serde_roundtrip() {
        let error = LoadError::Unavailable {
            reason: "empty".to_string(),
        };
        let json = serde_json::to_string(&error).unwrap();
        let parsed: LoadError = serde_json::from_str(&json).unwrap();
        assert_eq!(error, parsed);
    }
}
