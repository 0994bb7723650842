//! Durable session storage.
//!
//! The relay only ever needs two operations: insert a freshly derived
//! session and look one up by id. The trait is synchronous (store calls
//! are short and run from the hub loop or a handshake task) and
//! implementations share state across clones, so one store instance can
//! serve the handshake handler and the hub simultaneously.

mod error;
mod memory;
mod sqlite;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::session::{NewSession, SessionRecord};

/// Keyed backend for session records.
///
/// # Clone semantics
///
/// Clones share the underlying storage (implementations hold their state
/// behind `Arc`), mirroring a shared database handle.
pub trait SessionStore: Clone + Send + Sync + 'static {
    /// Persist a new session and return the stored record.
    ///
    /// Assigned ids are unique and monotonically increasing.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend rejects the write.
    fn create(&self, new: NewSession) -> Result<SessionRecord, StoreError>;

    /// Look up a session by id.
    ///
    /// Returns `Ok(None)` for an unknown id; errors are reserved for
    /// backend failures and corrupt rows.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend read fails or the stored row
    /// does not decode into a valid record.
    fn find_by_id(&self, id: i64) -> Result<Option<SessionRecord>, StoreError>;
}
