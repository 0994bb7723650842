//! Ephemeral P-256 key agreement.

use p256::ecdh::EphemeralSecret;
use p256::PublicKey;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::CryptoError;

/// Length of the HKDF salt in bytes.
pub const SALT_LEN: usize = 32;

/// Length of the ECDH shared secret in bytes (P-256 X coordinate).
const SECRET_LEN: usize = 32;

/// Generate a fresh ephemeral P-256 keypair.
///
/// One keypair per handshake; the secret half never leaves the process and
/// is dropped as soon as the session keys are derived.
#[must_use]
pub fn generate_keypair() -> (EphemeralSecret, PublicKey) {
    let secret = EphemeralSecret::random(&mut OsRng);
    let public = PublicKey::from(&secret);
    (secret, public)
}

/// Compute the ECDH shared secret with a peer's public key.
///
/// Returns the X coordinate of the scalar product as 32 bytes, left-padded
/// with zeros if the raw secret is shorter.
///
/// # Errors
///
/// - [`CryptoError::SharedSecret`] if the exchange yields an oversized
///   secret (cannot happen for well-formed P-256 keys, which the wire layer
///   has already validated).
pub fn shared_secret(
    secret: &EphemeralSecret,
    peer_public: &PublicKey,
) -> Result<[u8; SECRET_LEN], CryptoError> {
    let shared = secret.diffie_hellman(peer_public);
    let raw = shared.raw_secret_bytes();

    if raw.len() > SECRET_LEN {
        return Err(CryptoError::SharedSecret);
    }

    let mut out = [0u8; SECRET_LEN];
    out[SECRET_LEN - raw.len()..].copy_from_slice(raw);
    Ok(out)
}

/// Generate a random 32-byte HKDF salt.
#[must_use]
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}
