use std::io;

use thiserror::Error;

/// Errors raised by the SMTP client.
///
/// Server replies with error status codes are *not* errors at this layer;
/// they come back as [`crate::Response`] values for the caller to classify.
#[derive(Debug, Error)]
pub enum ClientError {
    /// I/O error on the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The server closed the connection.
    #[error("connection closed by server")]
    ConnectionClosed,

    /// The server sent something that is not a valid SMTP reply.
    #[error("failed to parse response: {0}")]
    ParseError(String),

    /// TLS negotiation failed.
    #[error("TLS error: {0}")]
    TlsError(String),

    /// The server reply was not valid UTF-8.
    #[error("invalid UTF-8 in response: {0}")]
    Utf8Error(#[from] std::str::Utf8Error),
}
