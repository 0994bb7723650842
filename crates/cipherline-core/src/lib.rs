//! Cipherline session state and handshake logic.
//!
//! Sits between the pure primitive crates and the server runtime. Three
//! concerns live here:
//!
//! - [`Session`]: the runtime view of one authenticated client, pairing
//!   the immutable key material with the atomic send counter and receive
//!   watermark that enforce frame ordering and replay rejection.
//! - [`SessionStore`]: the durable backend keyed by session id, with an
//!   in-memory implementation for tests and a SQLite implementation for
//!   the real server.
//! - [`perform_key_exchange`]: the server half of the authenticated
//!   key-agreement, one request in, one signed response out.
//!
//! Everything here is synchronous; the server crate supplies the async
//! runtime around it.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod handshake;
mod session;
pub mod store;

pub use handshake::{perform_key_exchange, HandshakeError};
pub use session::{NewSession, SequenceOverflow, Session, SessionRecord};
pub use store::{MemoryStore, SessionStore, SqliteStore, StoreError};
