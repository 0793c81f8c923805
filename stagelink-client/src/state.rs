//! Connection state.

use serde::{Deserialize, Serialize};

/// Connection state of the control socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Not connected; a reconnect attempt may be scheduled.
    Disconnected,
    /// Attempting to connect.
    Connecting,
    /// Successfully connected.
    Connected,
    /// Shut down by the application; no reconnect will be scheduled.
    Closed,
}

impl ConnectionState {
    /// Returns true if the connection is active.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Returns true if the client has been shut down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}
