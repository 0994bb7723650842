//! Error type for session storage backends.

use thiserror::Error;

/// Errors surfaced by a [`super::SessionStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A stored row did not decode into a valid session record.
    ///
    /// Key and salt blobs have fixed lengths; anything else means the
    /// database was written by something other than this process.
    #[error("corrupt session record {id}: {reason}")]
    CorruptRecord {
        /// Id of the offending row.
        id: i64,
        /// What failed to decode.
        reason: String,
    },
}
