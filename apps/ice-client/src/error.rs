//! Client error types

use net_transport::TransportError;

/// Bootstrapper error
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP request to {url} failed: {reason}")]
    Http { url: String, reason: String },

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Invalid ICE port {0:?}")]
    InvalidPort(String),

    #[error("Uploading the local password needs an http(s) origin")]
    UploadWithoutOrigin,

    #[error("Config file error: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

pub type ClientResult<T> = Result<T, ClientError>;
