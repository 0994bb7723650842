//! Client side of the key agreement.
//!
//! Mirrors the server handler step for step: generate an ephemeral P-256
//! keypair, wrap its JWK under the server's RSA public key, POST it, then
//! verify the response signature over the exact payload bytes before
//! deriving the session keys. Network and verification are split so the
//! pure half is testable without a server.

use std::sync::Arc;
use std::time::SystemTime;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use cipherline_core::{Session, SessionRecord};
use cipherline_crypto::{derive_session_keys, shared_secret, ServerVerifier, SALT_LEN};
use cipherline_proto::{
    EcJwk, ErrorBody, HandshakePayload, KeyExchangeRequest, KeyExchangeResponse, ProtocolError,
};
use p256::ecdh::EphemeralSecret;
use rand::rngs::OsRng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::ClientError;

/// Run the whole handshake against `server_addr` (`host:port`).
///
/// Returns the established session, ready for [`crate::ChatClient`].
///
/// # Errors
///
/// - [`ClientError::Http`] if the server rejects the exchange.
/// - [`ClientError::ServerSignature`] if the response is not authentic.
/// - [`ClientError::Transport`] on connection failure.
pub async fn perform_handshake(
    server_addr: &str,
    client_id: &str,
    verifier: &ServerVerifier,
) -> Result<Arc<Session>, ClientError> {
    let secret = EphemeralSecret::random(&mut OsRng);
    let jwk = EcJwk::from_public_key(&p256::PublicKey::from(&secret));
    let content = verifier.wrap_oaep(&serde_json::to_vec(&jwk)?)?;

    let request = KeyExchangeRequest { client_id: client_id.to_string(), content };
    let response = request_key_exchange(server_addr, &request).await?;

    complete_handshake(client_id, secret, verifier, &response)
}

/// POST a key-exchange request and parse the response.
///
/// Exposed separately so callers can inspect or manipulate the raw
/// response before completing the handshake.
///
/// # Errors
///
/// - [`ClientError::Transport`] on connection or read failure.
/// - [`ClientError::Http`] for non-200 responses.
pub async fn request_key_exchange(
    server_addr: &str,
    request: &KeyExchangeRequest,
) -> Result<KeyExchangeResponse, ClientError> {
    let body = serde_json::to_vec(request)?;

    let mut stream = TcpStream::connect(server_addr)
        .await
        .map_err(|e| ClientError::Transport(format!("connect failed: {e}")))?;

    let head = format!(
        "POST /key-exchange HTTP/1.1\r\nHost: {server_addr}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );

    stream
        .write_all(head.as_bytes())
        .await
        .map_err(|e| ClientError::Transport(format!("write failed: {e}")))?;
    stream
        .write_all(&body)
        .await
        .map_err(|e| ClientError::Transport(format!("write failed: {e}")))?;

    let mut raw = Vec::new();
    stream
        .read_to_end(&mut raw)
        .await
        .map_err(|e| ClientError::Transport(format!("read failed: {e}")))?;

    parse_http_response(&raw)
}

/// Verify the response and derive the session.
///
/// The signature is checked over the exact base64-decoded payload bytes;
/// only then is the payload parsed and mirrored through ECDH + HKDF.
///
/// # Errors
///
/// - [`ClientError::ServerSignature`] if verification fails; nothing in
///   the payload is used in that case.
/// - [`ClientError::Protocol`] / [`ClientError::Crypto`] for malformed
///   payload contents.
pub fn complete_handshake(
    client_id: &str,
    secret: EphemeralSecret,
    verifier: &ServerVerifier,
    response: &KeyExchangeResponse,
) -> Result<Arc<Session>, ClientError> {
    let payload_bytes = STANDARD
        .decode(&response.payload)
        .map_err(|e| ProtocolError::InvalidBase64 { field: "payload", source: e })?;
    let signature = STANDARD
        .decode(&response.signature)
        .map_err(|e| ProtocolError::InvalidBase64 { field: "signature", source: e })?;

    verifier
        .verify(&payload_bytes, &signature)
        .map_err(|_| ClientError::ServerSignature)?;

    let payload: HandshakePayload = serde_json::from_slice(&payload_bytes)?;
    let server_public = payload.server_public_key.to_public_key()?;

    let salt_bytes = STANDARD
        .decode(&payload.salt)
        .map_err(|e| ProtocolError::InvalidBase64 { field: "salt", source: e })?;
    let salt = <[u8; SALT_LEN]>::try_from(salt_bytes.as_slice()).map_err(|_| {
        ProtocolError::InvalidJwk {
            reason: format!("salt must be {SALT_LEN} bytes, got {}", salt_bytes.len()),
        }
    })?;

    let shared = shared_secret(&secret, &server_public)?;
    let keys = derive_session_keys(&shared, &salt);

    Ok(Arc::new(Session::new(SessionRecord {
        id: response.session_id,
        client_id: client_id.to_string(),
        salt,
        key_c2s: keys.k_c2s,
        key_s2c: keys.k_s2c,
        created_at: SystemTime::now(),
    })))
}

/// Parse a `Connection: close` HTTP response into a key-exchange result.
fn parse_http_response(raw: &[u8]) -> Result<KeyExchangeResponse, ClientError> {
    let text = String::from_utf8_lossy(raw);

    let Some((head, body)) = text.split_once("\r\n\r\n") else {
        return Err(ClientError::Transport("truncated http response".to_string()));
    };

    let status: u16 = head
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|code| code.parse().ok())
        .ok_or_else(|| ClientError::Transport("malformed status line".to_string()))?;

    if status != 200 {
        let message = serde_json::from_str::<ErrorBody>(body)
            .map(|e| e.error)
            .unwrap_or_else(|_| body.trim().to_string());
        return Err(ClientError::Http { status, message });
    }

    Ok(serde_json::from_str(body)?)
}
