//! Per-frame authenticated encryption using AES-128-GCM.
//!
//! Associated data is mandatory on both sides: the caller passes the bytes
//! produced by the proto layer's AAD builder, binding the ciphertext to its
//! routing metadata. A frame whose sender, recipient, or sequence number
//! was altered after sealing fails to open.

use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes128Gcm, Key, KeyInit, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::CryptoError;
use crate::kdf::KEY_LEN;

/// AEAD nonce length in bytes.
pub const NONCE_LEN: usize = 12;

/// Seal a plaintext under a 16-byte session key.
///
/// Generates a fresh random 12-byte nonce per call. Returns the ciphertext
/// (with trailing authentication tag) and the nonce.
///
/// # Errors
///
/// - [`CryptoError::InvalidKeyLength`] if `key` is not 16 bytes.
pub fn seal(
    key: &[u8],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<(Vec<u8>, [u8; NONCE_LEN]), CryptoError> {
    let cipher = cipher_for(key)?;

    let mut iv = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut iv);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::AeadFailure)?;

    Ok((ciphertext, iv))
}

/// Open a sealed frame.
///
/// # Errors
///
/// - [`CryptoError::InvalidKeyLength`] if `key` is not 16 bytes.
/// - [`CryptoError::InvalidNonceLength`] if `iv` is not 12 bytes.
/// - [`CryptoError::AeadFailure`] if the tag does not verify, which covers
///   both tampered ciphertext and mismatched associated data.
pub fn open(
    key: &[u8],
    ciphertext: &[u8],
    iv: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = cipher_for(key)?;

    if iv.len() != NONCE_LEN {
        return Err(CryptoError::InvalidNonceLength { expected: NONCE_LEN, actual: iv.len() });
    }

    cipher
        .decrypt(Nonce::from_slice(iv), Payload { msg: ciphertext, aad })
        .map_err(|_| CryptoError::AeadFailure)
}

fn cipher_for(key: &[u8]) -> Result<Aes128Gcm, CryptoError> {
    if key.len() != KEY_LEN {
        return Err(CryptoError::InvalidKeyLength { expected: KEY_LEN, actual: key.len() });
    }
    Ok(Aes128Gcm::new(Key::<Aes128Gcm>::from_slice(key)))
}
