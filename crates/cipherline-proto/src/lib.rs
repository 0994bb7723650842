//! Cipherline wire protocol types.
//!
//! Every message that crosses a process boundary is UTF-8 JSON, shaped for
//! interoperability with browser clients (camelCase field names, base64
//! blobs for binary data). This crate holds the plain data types and the
//! validation that belongs at the wire boundary; it performs no I/O and no
//! cryptography beyond point validation of public keys.
//!
//! # Message families
//!
//! - [`EncryptedFrame`]: the chat frame relayed over the duplex transport.
//!   Payloads are AEAD ciphertext; the frame itself is plaintext routing
//!   metadata bound into the AEAD via [`build_aad`].
//! - [`KeyExchangeRequest`] / [`KeyExchangeResponse`] / [`HandshakePayload`]:
//!   the one-shot handshake exchanged over HTTP before any chat traffic.
//! - [`EcJwk`]: JSON Web Key encoding of P-256 public keys, the only key
//!   representation that appears on the wire.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod aad;
mod error;
mod frame;
mod handshake;
mod jwk;

pub use aad::build_aad;
pub use error::ProtocolError;
pub use frame::EncryptedFrame;
pub use handshake::{ErrorBody, HandshakePayload, KeyExchangeRequest, KeyExchangeResponse};
pub use jwk::EcJwk;
