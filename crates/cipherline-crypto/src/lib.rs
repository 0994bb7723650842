//! Cipherline cryptographic primitives.
//!
//! Building blocks for the handshake and for per-frame encryption. The
//! functions here are small and independent; protocol flow lives in the
//! core crate.
//!
//! # Key lifecycle
//!
//! Each handshake performs one ephemeral P-256 exchange and derives two
//! directional AES-128-GCM keys that live for the whole session:
//!
//! ```text
//! ECDH(client ephemeral, server ephemeral)
//!        │
//!        ▼
//! HKDF-SHA256(salt, shared secret)
//!        │
//!        ├─ expand("c2s", 16) → K_c2s   client → server frames
//!        └─ expand("s2c", 16) → K_s2c   server → client frames
//! ```
//!
//! Every sealed frame uses a fresh random 12-byte nonce and binds its
//! routing metadata (sender, recipient, sequence number) as associated
//! data, so ciphertext cannot be replayed under rewritten metadata.
//!
//! # Server identity
//!
//! The relay holds one long-term RSA key ([`ServerIdentity`]): it unwraps
//! the OAEP-encrypted client ephemeral key and signs the handshake
//! response. Clients hold only the public half ([`ServerVerifier`]) and
//! must verify the signature before trusting anything in the response.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod aead;
mod ecdh;
mod error;
mod identity;
mod kdf;

pub use aead::{open, seal, NONCE_LEN};
pub use ecdh::{generate_keypair, generate_salt, shared_secret, SALT_LEN};
pub use error::CryptoError;
pub use identity::{ServerIdentity, ServerVerifier};
pub use kdf::{derive_session_keys, SessionKeys, KEY_LEN};
