use crate::http::codec::CodecError;
use std::net::SocketAddr;
use thiserror::Error;

/// Error types for the reflectsrv library
#[derive(Error, Debug)]
pub enum ReflectError {
    /// Socket-level errors (accept, connect, read, write)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The listener could not be bound
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Malformed HTTP framing on the wire
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Timeout errors
    #[error("Timeout error: {0}")]
    Timeout(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON encoding or decoding errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Errors building `http` requests or responses
    #[error("HTTP error: {0}")]
    Http(#[from] ::http::Error),
}

impl From<CodecError> for ReflectError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Io(e) => ReflectError::Io(e),
            other => ReflectError::Protocol(other.to_string()),
        }
    }
}

/// Result type for the reflectsrv library
pub type Result<T> = std::result::Result<T, ReflectError>;

pub mod common;
pub mod http;
pub mod reflect;

// Re-export main types for convenience
pub use crate::common::{EchoClient, EchoServerTrait};
pub use crate::http::{ClientConfig, HttpCodec, HttpConfig, HttpEchoClient, HttpEchoServer, Router};
pub use crate::reflect::{EchoResponse, ReflectHandler, reflect};
