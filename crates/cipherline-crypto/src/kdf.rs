//! Directional session-key derivation using HKDF.

use hkdf::Hkdf;
use sha2::Sha256;

/// Length of one directional AEAD key in bytes (AES-128-GCM).
pub const KEY_LEN: usize = 16;

/// HKDF info for the client-to-server key.
const INFO_C2S: &[u8] = b"c2s";

/// HKDF info for the server-to-client key.
const INFO_S2C: &[u8] = b"s2c";

/// The two directional keys of one session.
///
/// Directions never share a key: frames from the client are sealed under
/// `k_c2s`, frames from the server under `k_s2c`. A reflected ciphertext
/// therefore fails to open on either side.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKeys {
    /// Key for client-to-server traffic.
    pub k_c2s: [u8; KEY_LEN],
    /// Key for server-to-client traffic.
    pub k_s2c: [u8; KEY_LEN],
}

impl std::fmt::Debug for SessionKeys {
    // Key bytes stay out of logs.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeys").finish_non_exhaustive()
    }
}

/// Split an ECDH shared secret into the two directional session keys.
///
/// `PRK = HKDF-Extract(salt, shared_secret)`, then one 16-byte expand per
/// direction with the literal infos `"c2s"` and `"s2c"`. Both handshake
/// sides run this with identical inputs and obtain identical keys.
#[must_use]
pub fn derive_session_keys(shared_secret: &[u8], salt: &[u8]) -> SessionKeys {
    let hkdf = Hkdf::<Sha256>::new(Some(salt), shared_secret);

    let mut k_c2s = [0u8; KEY_LEN];
    let Ok(()) = hkdf.expand(INFO_C2S, &mut k_c2s) else {
        unreachable!("16 bytes is a valid HKDF-SHA256 output length");
    };

    let mut k_s2c = [0u8; KEY_LEN];
    let Ok(()) = hkdf.expand(INFO_S2C, &mut k_s2c) else {
        unreachable!("16 bytes is a valid HKDF-SHA256 output length");
    };

    SessionKeys { k_c2s, k_s2c }
}
