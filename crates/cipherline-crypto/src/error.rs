//! Error types for cryptographic operations.

use thiserror::Error;

/// Errors from the primitive layer.
///
/// AEAD and signature failures are deliberately carried as distinct
/// variants: the relay drops a frame on [`CryptoError::AeadFailure`] but
/// keeps the connection alive, while a client aborts the whole handshake
/// on [`CryptoError::SignatureMismatch`].
#[derive(Debug, Error)]
pub enum CryptoError {
    /// A symmetric key had the wrong length.
    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength {
        /// Required length.
        expected: usize,
        /// Provided length.
        actual: usize,
    },

    /// A nonce had the wrong length.
    #[error("invalid nonce length: expected {expected} bytes, got {actual}")]
    InvalidNonceLength {
        /// Required length.
        expected: usize,
        /// Provided length.
        actual: usize,
    },

    /// AEAD open failed: authentication tag or associated data mismatch.
    #[error("aead authentication failed")]
    AeadFailure,

    /// RSA-OAEP unwrap failed.
    #[error("oaep decryption failed")]
    OaepFailure,

    /// RSA-OAEP wrap failed (plaintext too large for the modulus).
    #[error("oaep encryption failed: {0}")]
    OaepWrapFailure(String),

    /// Signing with the server key failed.
    #[error("signing failed: {0}")]
    SigningFailure(String),

    /// A signature did not verify.
    #[error("signature verification failed")]
    SignatureMismatch,

    /// A PEM blob could not be parsed as an RSA key.
    #[error("invalid pem key material: {0}")]
    InvalidPem(String),

    /// Base64 decoding of a crypto blob failed.
    #[error("invalid base64: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    /// ECDH produced no usable shared secret.
    #[error("failed to derive shared secret")]
    SharedSecret,

    /// Reading key material from disk failed.
    #[error("failed to read key file: {0}")]
    KeyFile(#[from] std::io::Error),
}
