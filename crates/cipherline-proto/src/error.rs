//! Error types for wire protocol parsing and validation.

use thiserror::Error;

/// Errors produced while decoding or validating wire objects.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// JSON (de)serialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A base64 field could not be decoded.
    #[error("invalid base64 in field `{field}`: {source}")]
    InvalidBase64 {
        /// Name of the offending field.
        field: &'static str,
        /// Decoder error.
        #[source]
        source: base64::DecodeError,
    },

    /// A JWK was malformed or did not describe a valid P-256 public key.
    #[error("invalid jwk: {reason}")]
    InvalidJwk {
        /// What was wrong with the key.
        reason: String,
    },

    /// A frame arrived without ciphertext or nonce.
    ///
    /// Seen from clients that open the transport before completing the
    /// handshake; such frames are dropped at the boundary.
    #[error("frame is missing ciphertext or iv")]
    MissingCiphertext,
}
