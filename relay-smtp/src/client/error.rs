//! Error types for the SMTP client.

use std::io;

use thiserror::Error;

/// Errors that can occur when talking to an upstream server.
///
/// SMTP level rejections are not errors here: they come back as a
/// [`Response`](super::Response) for the caller to judge.
#[derive(Error, Debug)]
pub enum ClientError {
    /// IO error occurred during network operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The server sent something that is not an SMTP reply.
    #[error("Failed to parse SMTP response: {0}")]
    ParseError(String),

    /// TLS setup or handshake failed.
    #[error("TLS error: {0}")]
    TlsError(String),

    /// Connection was closed unexpectedly.
    #[error("Connection closed unexpectedly")]
    ConnectionClosed,
}

/// Specialized `Result` type for SMTP client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
