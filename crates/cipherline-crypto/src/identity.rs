//! Long-term RSA server identity.
//!
//! The relay holds one RSA private key loaded from PEM at startup. It is
//! used for exactly two operations: RSA-OAEP decryption of the wrapped
//! client ephemeral key, and PKCS#1 v1.5 signing of the handshake response
//! payload. Clients carry the public half out-of-band and verify the
//! signature before trusting the response.

use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::rngs::OsRng;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::{Oaep, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

use crate::error::CryptoError;

/// Key size used when generating throwaway identities for tests.
const GENERATED_BITS: usize = 2048;

/// The server's long-term RSA keypair.
pub struct ServerIdentity {
    key: RsaPrivateKey,
}

impl ServerIdentity {
    /// Load the identity from a PEM file (PKCS#8, with PKCS#1 fallback).
    ///
    /// # Errors
    ///
    /// - [`CryptoError::KeyFile`] if the file cannot be read.
    /// - [`CryptoError::InvalidPem`] if the contents are not an RSA private
    ///   key.
    pub fn from_pem_file(path: impl AsRef<Path>) -> Result<Self, CryptoError> {
        let pem = std::fs::read_to_string(path)?;
        Self::from_pem(&pem)
    }

    /// Parse the identity from PEM text.
    ///
    /// # Errors
    ///
    /// - [`CryptoError::InvalidPem`] if neither PKCS#8 nor PKCS#1 parsing
    ///   succeeds.
    pub fn from_pem(pem: &str) -> Result<Self, CryptoError> {
        let key = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| CryptoError::InvalidPem(e.to_string()))?;
        Ok(Self { key })
    }

    /// Generate a fresh identity.
    ///
    /// Intended for tests and local development; production deployments
    /// load a provisioned key so clients can pin the public half.
    ///
    /// # Errors
    ///
    /// - [`CryptoError::SigningFailure`] if key generation fails.
    pub fn generate() -> Result<Self, CryptoError> {
        let key = RsaPrivateKey::new(&mut OsRng, GENERATED_BITS)
            .map_err(|e| CryptoError::SigningFailure(e.to_string()))?;
        Ok(Self { key })
    }

    /// PEM encoding of the public key, for out-of-band distribution.
    ///
    /// # Errors
    ///
    /// - [`CryptoError::InvalidPem`] if encoding fails.
    pub fn public_key_pem(&self) -> Result<String, CryptoError> {
        self.key
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| CryptoError::InvalidPem(e.to_string()))
    }

    /// Decrypt a base64 RSA-OAEP blob with the private key.
    ///
    /// SHA-256 is used both as the OAEP hash and the MGF1 hash; the label
    /// is empty. This matches WebCrypto's `RSA-OAEP` with SHA-256.
    ///
    /// # Errors
    ///
    /// - [`CryptoError::InvalidBase64`] if the blob is not base64.
    /// - [`CryptoError::OaepFailure`] if decryption fails. The caller maps
    ///   this to the handshake's invalid-encrypted-content error.
    pub fn unwrap_oaep(&self, content_b64: &str) -> Result<Vec<u8>, CryptoError> {
        let ciphertext = STANDARD.decode(content_b64)?;
        self.key.decrypt(Oaep::new::<Sha256>(), &ciphertext).map_err(|_| CryptoError::OaepFailure)
    }

    /// Sign payload bytes with PKCS#1 v1.5 over SHA-256.
    ///
    /// # Errors
    ///
    /// - [`CryptoError::SigningFailure`] on an RSA-level failure.
    pub fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let digest = Sha256::digest(payload);
        self.key
            .sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
            .map_err(|e| CryptoError::SigningFailure(e.to_string()))
    }
}

impl std::fmt::Debug for ServerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerIdentity").finish_non_exhaustive()
    }
}

/// The client-side view of the server identity: public key only.
#[derive(Debug, Clone)]
pub struct ServerVerifier {
    key: RsaPublicKey,
}

impl ServerVerifier {
    /// Parse the server public key from PEM text (SPKI).
    ///
    /// # Errors
    ///
    /// - [`CryptoError::InvalidPem`] if parsing fails.
    pub fn from_public_key_pem(pem: &str) -> Result<Self, CryptoError> {
        let key = RsaPublicKey::from_public_key_pem(pem)
            .map_err(|e| CryptoError::InvalidPem(e.to_string()))?;
        Ok(Self { key })
    }

    /// RSA-OAEP-encrypt `data` for the server, returning base64.
    ///
    /// Used by clients to wrap their ephemeral public JWK during the
    /// handshake.
    ///
    /// # Errors
    ///
    /// - [`CryptoError::OaepWrapFailure`] if `data` exceeds the OAEP
    ///   capacity of the modulus.
    pub fn wrap_oaep(&self, data: &[u8]) -> Result<String, CryptoError> {
        let ciphertext = self
            .key
            .encrypt(&mut OsRng, Oaep::new::<Sha256>(), data)
            .map_err(|e| CryptoError::OaepWrapFailure(e.to_string()))?;
        Ok(STANDARD.encode(ciphertext))
    }

    /// Verify a PKCS#1 v1.5 signature over `payload`.
    ///
    /// # Errors
    ///
    /// - [`CryptoError::SignatureMismatch`] if verification fails. Clients
    ///   treat this as fatal and never open the chat transport.
    pub fn verify(&self, payload: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
        let digest = Sha256::digest(payload);
        self.key
            .verify(Pkcs1v15Sign::new::<Sha256>(), &digest, signature)
            .map_err(|_| CryptoError::SignatureMismatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> ServerIdentity {
        ServerIdentity::generate().unwrap()
    }

    #[test]
    fn oaep_wrap_unwrap_round_trip() {
        let server = identity();
        let client = ServerVerifier::from_public_key_pem(&server.public_key_pem().unwrap()).unwrap();

        let wrapped = client.wrap_oaep(b"client ephemeral jwk bytes").unwrap();
        let unwrapped = server.unwrap_oaep(&wrapped).unwrap();

        assert_eq!(unwrapped, b"client ephemeral jwk bytes");
    }

    #[test]
    fn unwrap_rejects_garbage_base64() {
        let server = identity();
        assert!(matches!(
            server.unwrap_oaep("%%% not base64 %%%"),
            Err(CryptoError::InvalidBase64(_))
        ));
    }

    #[test]
    fn unwrap_rejects_ciphertext_for_another_key() {
        let server_a = identity();
        let server_b = identity();
        let client =
            ServerVerifier::from_public_key_pem(&server_b.public_key_pem().unwrap()).unwrap();

        let wrapped = client.wrap_oaep(b"jwk").unwrap();
        assert!(matches!(server_a.unwrap_oaep(&wrapped), Err(CryptoError::OaepFailure)));
    }

    #[test]
    fn sign_verify_round_trip() {
        let server = identity();
        let verifier =
            ServerVerifier::from_public_key_pem(&server.public_key_pem().unwrap()).unwrap();

        let payload = br#"{"serverPublicKey":{},"salt":"AA=="}"#;
        let signature = server.sign(payload).unwrap();

        verifier.verify(payload, &signature).unwrap();
    }

    #[test]
    fn verify_rejects_flipped_payload_bit() {
        let server = identity();
        let verifier =
            ServerVerifier::from_public_key_pem(&server.public_key_pem().unwrap()).unwrap();

        let payload = b"authentic payload bytes".to_vec();
        let signature = server.sign(&payload).unwrap();

        let mut tampered = payload;
        tampered[0] ^= 0x01;

        assert!(matches!(
            verifier.verify(&tampered, &signature),
            Err(CryptoError::SignatureMismatch)
        ));
    }

    #[test]
    fn verify_rejects_truncated_signature() {
        let server = identity();
        let verifier =
            ServerVerifier::from_public_key_pem(&server.public_key_pem().unwrap()).unwrap();

        let signature = server.sign(b"payload").unwrap();
        assert!(verifier.verify(b"payload", &signature[..signature.len() - 1]).is_err());
    }

    #[test]
    fn invalid_pem_is_rejected() {
        assert!(matches!(
            ServerIdentity::from_pem("not a pem"),
            Err(CryptoError::InvalidPem(_))
        ));
        assert!(matches!(
            ServerVerifier::from_public_key_pem("still not a pem"),
            Err(CryptoError::InvalidPem(_))
        ));
    }
}
