//! Transport state enums as reported to observers

use std::fmt;

use serde::{Deserialize, Serialize};

/// ICE transport state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceTransportState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

impl IceTransportState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Checking => "checking",
            Self::Connected => "connected",
            Self::Completed => "completed",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        }
    }

    /// A usable path exists
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected | Self::Completed)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Closed)
    }
}

impl fmt::Display for IceTransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// ICE gathering state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceGathererState {
    New,
    Gathering,
    Complete,
}

impl fmt::Display for IceGathererState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::New => "new",
            Self::Gathering => "gathering",
            Self::Complete => "complete",
        };
        f.write_str(name)
    }
}

/// QUIC transport state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuicTransportState {
    New,
    Connecting,
    Connected,
    Closed,
    Failed,
}

impl QuicTransportState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Closed => "closed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

impl fmt::Display for QuicTransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_uses_platform_names() {
        assert_eq!(IceTransportState::New.to_string(), "new");
        assert_eq!(IceTransportState::Checking.to_string(), "checking");
        assert_eq!(IceTransportState::Disconnected.to_string(), "disconnected");
        assert_eq!(QuicTransportState::Connecting.to_string(), "connecting");
        assert_eq!(IceGathererState::Complete.to_string(), "complete");
    }

    #[test]
    fn test_terminal_states() {
        assert!(IceTransportState::Failed.is_terminal());
        assert!(!IceTransportState::Checking.is_terminal());
        assert!(IceTransportState::Completed.is_connected());
        assert!(QuicTransportState::Closed.is_terminal());
        assert!(!QuicTransportState::Connected.is_terminal());
    }
}
