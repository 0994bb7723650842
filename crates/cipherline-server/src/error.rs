//! Server-level error types.

use thiserror::Error;

/// Fatal server errors.
///
/// Frame-level problems (bad ciphertext, replays, slow consumers) never
/// surface here; they are handled where they occur and affect at most one
/// connection. This type covers conditions that prevent the server from
/// starting or continuing at all.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Binding the listen address failed.
    #[error("failed to bind listen address: {0}")]
    Bind(#[source] std::io::Error),

    /// Socket-level failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Session store failure during startup.
    #[error(transparent)]
    Store(#[from] cipherline_core::StoreError),

    /// Key material failure during startup.
    #[error(transparent)]
    Crypto(#[from] cipherline_crypto::CryptoError),
}
