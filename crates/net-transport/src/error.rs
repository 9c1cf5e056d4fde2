//! Transport error types

use ice_protocol::ProtocolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Bind error: {0}")]
    Bind(String),

    #[error("Send error: {0}")]
    Send(String),

    #[error("Receive error: {0}")]
    Receive(String),

    #[error("Candidates have not been gathered")]
    NotGathered,

    #[error("Candidates already gathered")]
    AlreadyGathered,

    #[error("Transport has not been started")]
    NotStarted,

    #[error("Transport is closed")]
    Closed,

    #[error("Socket unavailable: {0}")]
    SocketUnavailable(&'static str),

    #[error("Could not resolve candidate address: {0}")]
    Resolve(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Certificate error: {0}")]
    Certificate(String),

    #[error("Transport config error: {0}")]
    Config(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type TransportResult<T> = Result<T, TransportError>;
