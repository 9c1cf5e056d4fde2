//! Error types for the protocol

use thiserror::Error;

/// Protocol error
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Message truncated: need {needed} bytes, got {actual}")]
    Truncated { needed: usize, actual: usize },

    #[error("Invalid STUN magic cookie: {0:#010x}")]
    BadMagicCookie(u32),

    #[error("Malformed STUN header: {0}")]
    MalformedHeader(&'static str),

    #[error("Attribute too large: {size} bytes (max: {max})")]
    AttributeTooLarge { size: usize, max: usize },

    #[error("Username is not valid UTF-8")]
    InvalidUsername,

    #[error("Unsupported address family: {0:#04x}")]
    AddressFamily(u8),

    #[error("Invalid candidate: {0}")]
    InvalidCandidate(String),

    #[error("Unknown transport protocol: {0}")]
    UnknownProtocol(String),

    #[error("Unknown candidate type: {0}")]
    UnknownCandidateType(String),

    #[error("Invalid message integrity key")]
    InvalidKey,
}

/// Result type alias for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;
