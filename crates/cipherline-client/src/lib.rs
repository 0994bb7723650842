//! Cipherline client library.
//!
//! The client half of the relay protocol: performs the signed key
//! agreement over HTTP, then drives the encrypted chat transport. The
//! server's RSA public key must be supplied out-of-band
//! ([`cipherline_crypto::ServerVerifier`]); nothing in the handshake
//! response is trusted before its signature verifies against that key.
//!
//! ```no_run
//! use cipherline_client::{perform_handshake, ChatClient};
//! use cipherline_crypto::ServerVerifier;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let verifier = ServerVerifier::from_public_key_pem("...")?;
//! let session = perform_handshake("127.0.0.1:8080", "alice", &verifier).await?;
//! let mut chat = ChatClient::connect("127.0.0.1:8080", "alice", session).await?;
//!
//! chat.send_to("", b"hello everyone").await?; // broadcast
//! if let Some(event) = chat.recv().await? {
//!     println!("{}: {:?}", event.sender_id, event.plaintext);
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod chat;
mod error;
mod handshake;

pub use chat::{ChatClient, ChatEvent};
pub use error::ClientError;
pub use handshake::{complete_handshake, perform_handshake, request_key_exchange};
