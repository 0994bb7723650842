//! Client error types.

use thiserror::Error;

/// Errors from the client side of the protocol.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The key-exchange endpoint answered with an error status.
    #[error("key exchange failed with status {status}: {message}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Error message from the response body.
        message: String,
    },

    /// The handshake response signature did not verify.
    ///
    /// Fatal: the response cannot be trusted and the chat transport is
    /// never opened.
    #[error("server signature verification failed")]
    ServerSignature,

    /// Transport-level failure (TCP or WebSocket).
    #[error("transport error: {0}")]
    Transport(String),

    /// A wire object failed to parse or validate.
    #[error(transparent)]
    Protocol(#[from] cipherline_proto::ProtocolError),

    /// A cryptographic operation failed.
    #[error(transparent)]
    Crypto(#[from] cipherline_crypto::CryptoError),

    /// The session send counter overflowed.
    #[error(transparent)]
    Sequence(#[from] cipherline_core::SequenceOverflow),

    /// JSON (de)serialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
