//! Session records and runtime sequence counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use cipherline_crypto::{SessionKeys, KEY_LEN, SALT_LEN};
use thiserror::Error;

/// The durable fields of a session, as persisted by the store.
///
/// Created once per successful handshake and immutable afterwards: the id
/// is stable for the session's lifetime and the key material never
/// changes. Only the runtime counters in [`Session`] evolve.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    /// Store-assigned identifier, monotonically increasing.
    pub id: i64,
    /// Client identifier supplied during the handshake.
    pub client_id: String,
    /// HKDF salt used to derive the directional keys.
    pub salt: [u8; SALT_LEN],
    /// Key for client-to-server frames.
    pub key_c2s: [u8; KEY_LEN],
    /// Key for server-to-client frames.
    pub key_s2c: [u8; KEY_LEN],
    /// Creation time.
    pub created_at: SystemTime,
}

/// The fields of a session before the store assigns an id.
#[derive(Debug, Clone)]
pub struct NewSession {
    /// Client identifier supplied during the handshake.
    pub client_id: String,
    /// HKDF salt used to derive the directional keys.
    pub salt: [u8; SALT_LEN],
    /// Derived directional keys.
    pub keys: SessionKeys,
}

/// The send counter exhausted its 64-bit space.
///
/// Practically unreachable, but sequence numbers must never repeat: reuse
/// would let an old frame replay under a fresh AAD. Callers treat this as
/// fatal for the session.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("session {session_id} send sequence overflowed")]
pub struct SequenceOverflow {
    /// Session whose counter overflowed.
    pub session_id: i64,
}

/// Runtime view of a session: record plus sequence state.
///
/// Shared via `Arc` between the hub (which assigns outbound sequence
/// numbers) and the connection read loop (which advances the receive
/// watermark), so both counters are atomic.
///
/// # Invariants
///
/// - `send_seq` values handed out by [`Self::next_send_seq`] are strictly
///   increasing and never reused.
/// - A frame is accepted at most once: [`Self::advance_recv_seq`] only
///   succeeds for sequence numbers strictly above the current watermark.
#[derive(Debug)]
pub struct Session {
    record: SessionRecord,
    send_seq: AtomicU64,
    recv_seq: AtomicU64,
}

impl Session {
    /// Wrap a stored record with zeroed counters.
    ///
    /// Counters are tied to the process lifetime: a restart resets them
    /// even though the record survives in the store, which is why clients
    /// re-handshake after a server restart.
    #[must_use]
    pub fn new(record: SessionRecord) -> Self {
        Self { record, send_seq: AtomicU64::new(0), recv_seq: AtomicU64::new(0) }
    }

    /// Session id.
    #[must_use]
    pub fn id(&self) -> i64 {
        self.record.id
    }

    /// Client id bound to this session.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.record.client_id
    }

    /// Key for client-to-server frames.
    #[must_use]
    pub fn key_c2s(&self) -> &[u8; KEY_LEN] {
        &self.record.key_c2s
    }

    /// Key for server-to-client frames.
    #[must_use]
    pub fn key_s2c(&self) -> &[u8; KEY_LEN] {
        &self.record.key_s2c
    }

    /// Allocate the next outbound sequence number.
    ///
    /// The first call returns 1. Numbers are never reused, also under
    /// concurrent callers.
    ///
    /// # Errors
    ///
    /// - [`SequenceOverflow`] if the counter would wrap.
    pub fn next_send_seq(&self) -> Result<u64, SequenceOverflow> {
        let previous = self.send_seq.fetch_add(1, Ordering::AcqRel);
        if previous == u64::MAX {
            return Err(SequenceOverflow { session_id: self.record.id });
        }
        Ok(previous + 1)
    }

    /// Last assigned outbound sequence number (0 before the first send).
    #[must_use]
    pub fn send_seq(&self) -> u64 {
        self.send_seq.load(Ordering::Acquire)
    }

    /// Current receive watermark: highest accepted inbound sequence number.
    #[must_use]
    pub fn recv_seq(&self) -> u64 {
        self.recv_seq.load(Ordering::Acquire)
    }

    /// Try to accept an inbound sequence number.
    ///
    /// Returns `true` and raises the watermark iff `seq` is strictly above
    /// it; `false` marks a replay or out-of-order frame, which the caller
    /// drops. A CAS loop keeps this safe against concurrent readers of the
    /// same session.
    pub fn advance_recv_seq(&self, seq: u64) -> bool {
        let mut current = self.recv_seq.load(Ordering::Acquire);
        loop {
            if seq <= current {
                return false;
            }
            match self.recv_seq.compare_exchange_weak(
                current,
                seq,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use proptest::prelude::*;

    use super::*;

    fn record() -> SessionRecord {
        SessionRecord {
            id: 1,
            client_id: "alice".to_string(),
            salt: [0u8; SALT_LEN],
            key_c2s: [1u8; KEY_LEN],
            key_s2c: [2u8; KEY_LEN],
            created_at: SystemTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn send_seq_starts_at_one_and_increases() {
        let session = Session::new(record());

        assert_eq!(session.send_seq(), 0);
        assert_eq!(session.next_send_seq().unwrap(), 1);
        assert_eq!(session.next_send_seq().unwrap(), 2);
        assert_eq!(session.next_send_seq().unwrap(), 3);
        assert_eq!(session.send_seq(), 3);
    }

    #[test]
    fn recv_watermark_accepts_only_strictly_increasing() {
        let session = Session::new(record());

        assert!(session.advance_recv_seq(1));
        assert!(!session.advance_recv_seq(1), "replay must be rejected");
        assert!(!session.advance_recv_seq(0));
        assert!(session.advance_recv_seq(5), "gaps are allowed");
        assert!(!session.advance_recv_seq(3), "late frames behind the watermark are rejected");
        assert_eq!(session.recv_seq(), 5);
    }

    #[test]
    fn concurrent_senders_never_share_a_sequence_number() {
        let session = Arc::new(Session::new(record()));
        let mut handles = Vec::new();

        for _ in 0..8 {
            let session = Arc::clone(&session);
            handles.push(std::thread::spawn(move || {
                (0..100).map(|_| session.next_send_seq().unwrap()).collect::<Vec<_>>()
            }));
        }

        let mut all: Vec<u64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        all.sort_unstable();
        all.dedup();

        assert_eq!(all.len(), 800, "sequence numbers must be unique");
        assert_eq!(*all.last().unwrap(), 800);
    }

    #[test]
    fn concurrent_watermark_accepts_each_seq_at_most_once() {
        let session = Arc::new(Session::new(record()));
        let mut handles = Vec::new();

        // Every thread races to claim the same sequence numbers; each number
        // may be accepted by at most one thread.
        for _ in 0..4 {
            let session = Arc::clone(&session);
            handles.push(std::thread::spawn(move || {
                (1..=200u64).filter(|&seq| session.advance_recv_seq(seq)).count()
            }));
        }

        let accepted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert!(accepted <= 200);
        assert_eq!(session.recv_seq(), 200);
    }

    #[test]
    fn overflow_is_reported() {
        let session = Session::new(record());
        session.send_seq.store(u64::MAX, Ordering::Release);

        assert_eq!(
            session.next_send_seq(),
            Err(SequenceOverflow { session_id: 1 })
        );
    }

    proptest! {
        #[test]
        fn watermark_is_monotone(seqs in proptest::collection::vec(1..10_000u64, 1..100)) {
            let session = Session::new(record());
            let mut high = 0u64;

            for seq in seqs {
                let accepted = session.advance_recv_seq(seq);
                prop_assert_eq!(accepted, seq > high);
                high = high.max(seq);
                prop_assert_eq!(session.recv_seq(), high);
            }
        }
    }
}
