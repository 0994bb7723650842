//! Encrypted chat frame relayed between clients and the hub.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// A single chat frame as it appears on the duplex transport.
///
/// Frames travel as JSON text messages. The `content` field is AEAD
/// ciphertext (including the authentication tag) and `iv` is the 12-byte
/// nonce, both base64-encoded. Everything else is plaintext routing
/// metadata, authenticated but not encrypted: `sender_id`, `recipient_id`
/// and `seq_no` are bound into the AEAD through the associated data (see
/// [`crate::build_aad`]), so a relay that rewrites them produces a frame
/// that fails to open.
///
/// An empty `recipient_id` addresses every authenticated peer except the
/// sender (broadcast).
///
/// # Invariants
///
/// - Boundary validity: both `content` and `iv` are present and non-empty,
///   or the frame is dropped before any further processing
///   ([`Self::validate_ciphertext`]).
/// - Session binding: `session_id` equals the session of the connection
///   that carries the frame. Enforced by the connection read loop, not
///   here.
///
/// All fields default when absent so that any JSON object deserializes;
/// the boundary checks then reject what does not belong. This mirrors the
/// permissive decoding of the browser client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedFrame {
    /// Session the frame belongs to.
    #[serde(default)]
    pub session_id: i64,

    /// Client id of the originator.
    #[serde(default)]
    pub sender_id: String,

    /// Client id of the addressee; empty string means broadcast.
    #[serde(default)]
    pub recipient_id: String,

    /// Sequence number assigned by the sealer; strictly increasing per
    /// session and direction.
    #[serde(default)]
    pub seq_no: u64,

    /// Base64 AEAD ciphertext with trailing authentication tag.
    #[serde(default)]
    pub content: String,

    /// Base64 12-byte AEAD nonce.
    #[serde(default)]
    pub iv: String,
}

impl EncryptedFrame {
    /// Whether the frame carries ciphertext at all.
    ///
    /// Frames without `content` or `iv` are pre-handshake noise and are
    /// dropped without being treated as an error.
    #[must_use]
    pub fn has_ciphertext(&self) -> bool {
        !self.content.is_empty() && !self.iv.is_empty()
    }

    /// Enforce the transport-boundary invariant.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::MissingCiphertext`] if `content` or `iv` is empty.
    pub fn validate_ciphertext(&self) -> Result<(), ProtocolError> {
        if self.has_ciphertext() {
            Ok(())
        } else {
            Err(ProtocolError::MissingCiphertext)
        }
    }

    /// Parse a frame from a JSON text message.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::Json`] if the text is not a JSON object of the
    ///   expected shape.
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Serialize the frame to the JSON text representation.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::Json`] on serializer failure.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}
