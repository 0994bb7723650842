//! Server side of the authenticated key agreement.
//!
//! One request, one response, no partial state: either every step succeeds
//! and a session row exists, or the caller gets an error and nothing was
//! created. The handler performs no transport I/O; the HTTP layer maps
//! [`HandshakeError`] onto status codes.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use cipherline_crypto::{
    derive_session_keys, generate_keypair, generate_salt, shared_secret, ServerIdentity,
};
use cipherline_proto::{EcJwk, HandshakePayload, KeyExchangeRequest, KeyExchangeResponse};
use thiserror::Error;
use tracing::warn;

use crate::session::NewSession;
use crate::store::SessionStore;

/// Failures of the key-exchange endpoint.
///
/// Variants carry no internal detail on purpose: the message is the HTTP
/// response body. Causes worth keeping are logged where they occur.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// RSA-OAEP unwrap of the client blob failed.
    #[error("invalid encrypted content")]
    InvalidEncryptedContent,

    /// The unwrapped JWK was malformed, off-curve, or unusable for ECDH.
    #[error("invalid client public key")]
    InvalidClientKey,

    /// Key generation, signing, or storage failed.
    #[error("internal server error")]
    ServerFailure,
}

impl HandshakeError {
    /// HTTP status code for this error.
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Self::InvalidEncryptedContent | Self::InvalidClientKey => 400,
            Self::ServerFailure => 500,
        }
    }
}

/// Execute the key exchange for one request.
///
/// Steps: unwrap the client's ephemeral public JWK, run ECDH against a
/// fresh server ephemeral keypair, split the shared secret into the two
/// directional keys with a random salt, persist the session, and return
/// the signed response. The payload is serialized exactly once and those
/// bytes are signed; the response carries their base64 verbatim so client
/// verification sees the same bytes (field order in JSON is not canonical,
/// so re-serialization would break the signature).
///
/// # Errors
///
/// - [`HandshakeError::InvalidEncryptedContent`] if the OAEP unwrap fails.
/// - [`HandshakeError::InvalidClientKey`] if the JWK does not describe a
///   usable P-256 public key.
/// - [`HandshakeError::ServerFailure`] on store or signing failure. No
///   session row exists in this case unless the failure happened after
///   the insert, in which case the row is unreachable (its id was never
///   revealed).
pub fn perform_key_exchange<S: SessionStore>(
    identity: &ServerIdentity,
    store: &S,
    request: &KeyExchangeRequest,
) -> Result<KeyExchangeResponse, HandshakeError> {
    let jwk_bytes = identity.unwrap_oaep(&request.content).map_err(|e| {
        warn!(client_id = %request.client_id, error = %e, "could not decrypt client public jwk");
        HandshakeError::InvalidEncryptedContent
    })?;

    let client_public = EcJwk::from_json_bytes(&jwk_bytes)
        .and_then(|jwk| jwk.to_public_key())
        .map_err(|e| {
            warn!(client_id = %request.client_id, error = %e, "failed to parse client jwk");
            HandshakeError::InvalidClientKey
        })?;

    let (server_secret, server_public) = generate_keypair();

    let secret = shared_secret(&server_secret, &client_public).map_err(|e| {
        warn!(client_id = %request.client_id, error = %e, "failed to derive shared secret");
        HandshakeError::InvalidClientKey
    })?;

    let salt = generate_salt();
    let keys = derive_session_keys(&secret, &salt);

    let record = store
        .create(NewSession { client_id: request.client_id.clone(), salt, keys })
        .map_err(|e| {
            warn!(client_id = %request.client_id, error = %e, "failed to create session");
            HandshakeError::ServerFailure
        })?;

    let payload = HandshakePayload {
        server_public_key: EcJwk::from_public_key(&server_public),
        salt: STANDARD.encode(salt),
    };

    // The single serialization whose bytes get signed.
    let payload_bytes = serde_json::to_vec(&payload).map_err(|e| {
        warn!(error = %e, "failed to serialize handshake payload");
        HandshakeError::ServerFailure
    })?;

    let signature = identity.sign(&payload_bytes).map_err(|e| {
        warn!(error = %e, "failed to sign handshake payload");
        HandshakeError::ServerFailure
    })?;

    Ok(KeyExchangeResponse {
        payload: STANDARD.encode(&payload_bytes),
        signature: STANDARD.encode(signature),
        session_id: record.id,
    })
}

#[cfg(test)]
mod tests {
    use cipherline_crypto::ServerVerifier;
    use p256::ecdh::EphemeralSecret;
    use p256::PublicKey;
    use rand::rngs::OsRng;

    use crate::store::MemoryStore;

    use super::*;

    struct TestClient {
        secret: EphemeralSecret,
        verifier: ServerVerifier,
    }

    fn setup() -> (ServerIdentity, MemoryStore, TestClient) {
        let identity = ServerIdentity::generate().unwrap();
        let verifier =
            ServerVerifier::from_public_key_pem(&identity.public_key_pem().unwrap()).unwrap();
        let secret = EphemeralSecret::random(&mut OsRng);
        (identity, MemoryStore::new(), TestClient { secret, verifier })
    }

    fn wrapped_request(client: &TestClient, client_id: &str) -> KeyExchangeRequest {
        let jwk = EcJwk::from_public_key(&PublicKey::from(&client.secret));
        let content = client.verifier.wrap_oaep(&serde_json::to_vec(&jwk).unwrap()).unwrap();
        KeyExchangeRequest { client_id: client_id.to_string(), content }
    }

    #[test]
    fn successful_exchange_creates_session_and_matching_keys() {
        let (identity, store, client) = setup();
        let request = wrapped_request(&client, "alice");

        let response = perform_key_exchange(&identity, &store, &request).unwrap();

        // Signature verifies over the exact payload bytes.
        let payload_bytes = STANDARD.decode(&response.payload).unwrap();
        let signature = STANDARD.decode(&response.signature).unwrap();
        client.verifier.verify(&payload_bytes, &signature).unwrap();

        // Client mirrors the derivation and must land on the same keys.
        let payload: HandshakePayload = serde_json::from_slice(&payload_bytes).unwrap();
        let server_public = payload.server_public_key.to_public_key().unwrap();
        let secret = shared_secret(&client.secret, &server_public).unwrap();
        let salt = STANDARD.decode(&payload.salt).unwrap();
        let client_keys = derive_session_keys(&secret, &salt);

        let record = store.find_by_id(response.session_id).unwrap().unwrap();
        assert_eq!(record.client_id, "alice");
        assert_eq!(record.key_c2s, client_keys.k_c2s);
        assert_eq!(record.key_s2c, client_keys.k_s2c);
    }

    #[test]
    fn garbage_content_is_invalid_encrypted_content() {
        let (identity, store, _client) = setup();
        let request = KeyExchangeRequest {
            client_id: "alice".to_string(),
            content: STANDARD.encode([0u8; 256]),
        };

        let err = perform_key_exchange(&identity, &store, &request).unwrap_err();
        assert_eq!(err, HandshakeError::InvalidEncryptedContent);
        assert_eq!(err.status(), 400);
        assert!(store.is_empty(), "no session may be created on failure");
    }

    #[test]
    fn non_base64_content_is_invalid_encrypted_content() {
        let (identity, store, _client) = setup();
        let request = KeyExchangeRequest {
            client_id: "alice".to_string(),
            content: "!!!".to_string(),
        };

        let err = perform_key_exchange(&identity, &store, &request).unwrap_err();
        assert_eq!(err, HandshakeError::InvalidEncryptedContent);
        assert!(store.is_empty());
    }

    #[test]
    fn wrapped_non_jwk_is_invalid_client_key() {
        let (identity, store, client) = setup();
        let content = client.verifier.wrap_oaep(b"not a jwk at all").unwrap();
        let request = KeyExchangeRequest { client_id: "alice".to_string(), content };

        let err = perform_key_exchange(&identity, &store, &request).unwrap_err();
        assert_eq!(err, HandshakeError::InvalidClientKey);
        assert!(store.is_empty());
    }

    #[test]
    fn off_curve_point_is_invalid_client_key() {
        let (identity, store, client) = setup();

        let bogus = serde_json::json!({
            "kty": "EC",
            "crv": "P-256",
            "x": base64::engine::general_purpose::URL_SAFE_NO_PAD.encode([1u8; 32]),
            "y": base64::engine::general_purpose::URL_SAFE_NO_PAD.encode([2u8; 32]),
            "ext": true,
        });
        let content = client.verifier.wrap_oaep(&serde_json::to_vec(&bogus).unwrap()).unwrap();
        let request = KeyExchangeRequest { client_id: "alice".to_string(), content };

        let err = perform_key_exchange(&identity, &store, &request).unwrap_err();
        assert_eq!(err, HandshakeError::InvalidClientKey);
        assert!(store.is_empty());
    }

    #[test]
    fn each_exchange_yields_a_fresh_session() {
        let (identity, store, client) = setup();

        let first =
            perform_key_exchange(&identity, &store, &wrapped_request(&client, "alice")).unwrap();
        let second =
            perform_key_exchange(&identity, &store, &wrapped_request(&client, "alice")).unwrap();

        assert_ne!(first.session_id, second.session_id);

        let a = store.find_by_id(first.session_id).unwrap().unwrap();
        let b = store.find_by_id(second.session_id).unwrap().unwrap();
        assert_ne!(a.key_c2s, b.key_c2s, "fresh salt and ephemerals per exchange");
    }

    #[test]
    fn status_mapping() {
        assert_eq!(HandshakeError::InvalidEncryptedContent.status(), 400);
        assert_eq!(HandshakeError::InvalidClientKey.status(), 400);
        assert_eq!(HandshakeError::ServerFailure.status(), 500);
    }
}
