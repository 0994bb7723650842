//! Key-exchange request and response objects.
//!
//! The handshake is a single HTTP round trip. The client wraps its
//! ephemeral public key (JWK-encoded) under the server's long-term RSA key
//! with OAEP; the server answers with a signed payload carrying its own
//! ephemeral public key and the HKDF salt, plus the new session id.

use serde::{Deserialize, Serialize};

use crate::jwk::EcJwk;

/// Body of `POST /key-exchange`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyExchangeRequest {
    /// Free-form client identifier chosen by the caller.
    #[serde(default)]
    pub client_id: String,

    /// Base64 RSA-OAEP ciphertext of the JSON-encoded client public JWK.
    #[serde(default)]
    pub content: String,
}

/// Successful response of `POST /key-exchange`.
///
/// `payload` is the base64 of the exact bytes that were signed. Clients
/// MUST verify `signature` over those decoded bytes before parsing them;
/// re-serializing the payload on either side breaks verification because
/// JSON field order is not canonical.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyExchangeResponse {
    /// Base64 of the signed [`HandshakePayload`] JSON bytes.
    pub payload: String,

    /// Base64 RSA PKCS#1 v1.5 signature over the payload bytes.
    pub signature: String,

    /// Identifier of the session created by this exchange.
    pub session_id: i64,
}

/// The signed portion of the key-exchange response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakePayload {
    /// Server ephemeral P-256 public key.
    pub server_public_key: EcJwk,

    /// Base64 of the 32-byte HKDF salt.
    pub salt: String,
}

/// JSON body of HTTP error responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable error message, safe to show to clients.
    pub error: String,
}

impl ErrorBody {
    /// Build an error body from any displayable message.
    pub fn new(message: impl Into<String>) -> Self {
        Self { error: message.into() }
    }
}
