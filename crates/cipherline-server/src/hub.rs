//! The hub: membership and frame routing.
//!
//! A single consumer task owns the `client id → connection` map. All
//! mutation (register, unregister, dispatch) flows through one channel, so
//! no two peers ever observe inconsistent membership and no locking is
//! needed on the routing path. The session-counter cache is the one shared
//! structure: connections resolve their session through the same
//! `RwLock`-guarded map the dispatcher uses, so send counters and receive
//! watermarks are unified per session id for the process lifetime.
//!
//! Dispatch re-encrypts per recipient: the hub opens nothing (frames
//! arrive as plaintext events from connection read loops) but seals every
//! outgoing frame under the target session's server-to-client key with a
//! fresh sequence number and associated data.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use cipherline_core::{Session, SessionStore, StoreError};
use cipherline_crypto::seal;
use cipherline_proto::{build_aad, EncryptedFrame};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::connection::ClientHandle;

/// Capacity of the hub event channel.
const EVENT_QUEUE_CAPACITY: usize = 64;

/// Inputs consumed by the hub loop.
pub(crate) enum HubEvent {
    /// A connection finished its upgrade and joins the population.
    Register {
        /// Handle to the new connection.
        handle: ClientHandle,
    },
    /// A connection is gone; remove it if it is still the registered one.
    Unregister {
        /// Client id of the departing connection.
        client_id: String,
        /// Connection instance, to guard against removing a successor.
        conn_id: u64,
    },
    /// A decrypted inbound frame ready for routing.
    Deliver {
        /// Client id of the originating connection.
        sender_id: String,
        /// Addressee; empty means broadcast.
        recipient_id: String,
        /// Plaintext chat payload.
        payload: Vec<u8>,
    },
}

/// Cloneable handle for talking to the hub.
///
/// Connections and the HTTP layer use this to send events and to resolve
/// sessions. Session resolution takes the read lock on the cache first and
/// falls back to the store on a miss, caching the loaded session so all
/// parties share one set of counters per session id.
pub struct HubHandle<S: SessionStore> {
    events: mpsc::Sender<HubEvent>,
    sessions: Arc<RwLock<HashMap<i64, Arc<Session>>>>,
    store: S,
    next_conn_id: Arc<AtomicU64>,
}

impl<S: SessionStore> Clone for HubHandle<S> {
    fn clone(&self) -> Self {
        Self {
            events: self.events.clone(),
            sessions: Arc::clone(&self.sessions),
            store: self.store.clone(),
            next_conn_id: Arc::clone(&self.next_conn_id),
        }
    }
}

impl<S: SessionStore> HubHandle<S> {
    /// Allocate a process-unique connection id.
    pub(crate) fn allocate_conn_id(&self) -> u64 {
        self.next_conn_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a connection with the hub.
    pub(crate) async fn register(&self, handle: ClientHandle) {
        let _ = self.events.send(HubEvent::Register { handle }).await;
    }

    /// Remove a connection. A no-op if `conn_id` is not the registered
    /// instance for `client_id` (the connection was already evicted).
    pub(crate) async fn unregister(&self, client_id: String, conn_id: u64) {
        let _ = self.events.send(HubEvent::Unregister { client_id, conn_id }).await;
    }

    /// Hand a decrypted frame to the router.
    pub(crate) async fn deliver(&self, sender_id: String, recipient_id: String, payload: Vec<u8>) {
        let _ = self.events.send(HubEvent::Deliver { sender_id, recipient_id, payload }).await;
    }

    /// Resolve a session by id, loading from the store and caching on miss.
    ///
    /// Returns `Ok(None)` for ids the store does not know.
    ///
    /// # Errors
    ///
    /// - [`StoreError`] if the store lookup itself fails.
    pub fn session(&self, session_id: i64) -> Result<Option<Arc<Session>>, StoreError> {
        if let Ok(cache) = self.sessions.read() {
            if let Some(session) = cache.get(&session_id) {
                return Ok(Some(Arc::clone(session)));
            }
        }

        let Some(record) = self.store.find_by_id(session_id)? else {
            return Ok(None);
        };

        let mut cache = match self.sessions.write() {
            Ok(cache) => cache,
            Err(poisoned) => poisoned.into_inner(),
        };

        // Another caller may have raced the load; reuse its instance so
        // the counters stay unified.
        let session =
            cache.entry(session_id).or_insert_with(|| Arc::new(Session::new(record))).clone();
        Ok(Some(session))
    }
}

/// Spawn the hub task and return its handle.
pub(crate) fn spawn_hub<S: SessionStore>(
    store: S,
    shutdown: watch::Receiver<bool>,
) -> HubHandle<S> {
    let (hub, handle) = Hub::new(store, shutdown);
    tokio::spawn(hub.run());
    handle
}

/// Outcome of one encrypt-and-send attempt.
#[derive(Debug, PartialEq, Eq)]
enum SendOutcome {
    /// Frame enqueued on the target.
    Sent,
    /// Target skipped; it stays registered.
    Skipped,
    /// Target is broken or too slow; evict it.
    Evict,
}

pub(crate) struct Hub<S: SessionStore> {
    clients: HashMap<String, ClientHandle>,
    events: mpsc::Receiver<HubEvent>,
    shutdown: watch::Receiver<bool>,
    handle: HubHandle<S>,
}

#[cfg(test)]
impl<S: SessionStore> Hub<S> {
    /// Build an unspawned hub so tests can inspect its event channel.
    pub(crate) fn new_for_tests(store: S, shutdown: watch::Receiver<bool>) -> (Self, HubHandle<S>) {
        Self::new(store, shutdown)
    }

    /// Pop the next queued event without running the loop.
    pub(crate) fn try_recv_event(&mut self) -> Option<HubEvent> {
        self.events.try_recv().ok()
    }
}

impl<S: SessionStore> Hub<S> {
    fn new(store: S, shutdown: watch::Receiver<bool>) -> (Self, HubHandle<S>) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);

        let handle = HubHandle {
            events: events_tx,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            store,
            next_conn_id: Arc::new(AtomicU64::new(1)),
        };

        let hub = Hub {
            clients: HashMap::new(),
            events: events_rx,
            shutdown,
            handle: handle.clone(),
        };

        (hub, handle)
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    info!("hub shutting down");
                    return;
                }
                event = self.events.recv() => {
                    match event {
                        Some(HubEvent::Register { handle }) => self.register(handle),
                        Some(HubEvent::Unregister { client_id, conn_id }) => {
                            self.unregister(&client_id, conn_id);
                        }
                        Some(HubEvent::Deliver { sender_id, recipient_id, payload }) => {
                            self.dispatch(&sender_id, &recipient_id, &payload);
                        }
                        None => return,
                    }
                }
            }
        }
    }

    fn register(&mut self, handle: ClientHandle) {
        let client_id = handle.client_id.clone();

        if let Some(evicted) = self.clients.insert(client_id.clone(), handle) {
            // At most one live connection per client id: dropping the old
            // handle closes its outbound queue and winds the connection
            // down.
            warn!(
                client_id = %client_id,
                old_conn = evicted.conn_id,
                "evicting duplicate connection for client id"
            );
        }

        info!(total_clients = self.clients.len(), "client connected");
    }

    fn unregister(&mut self, client_id: &str, conn_id: u64) {
        let registered = self.clients.get(client_id).is_some_and(|h| h.conn_id == conn_id);
        if registered {
            self.clients.remove(client_id);
            info!(total_clients = self.clients.len(), "client disconnected");
        }
    }

    fn dispatch(&mut self, sender_id: &str, recipient_id: &str, payload: &[u8]) {
        let mut evicted: Vec<String> = Vec::new();

        if !recipient_id.is_empty() {
            match self.clients.get(recipient_id) {
                None => {
                    warn!(recipient_id = %recipient_id, "recipient not found");
                }
                Some(target) => {
                    if self.encrypt_and_send(sender_id, recipient_id, payload, target)
                        == SendOutcome::Evict
                    {
                        evicted.push(recipient_id.to_string());
                    }
                }
            }
        } else {
            for (client_id, target) in &self.clients {
                // Echo suppression: a broadcast never returns to its origin.
                if client_id == sender_id {
                    continue;
                }

                if self.encrypt_and_send(sender_id, recipient_id, payload, target)
                    == SendOutcome::Evict
                {
                    evicted.push(client_id.clone());
                }
            }
        }

        for client_id in evicted {
            self.clients.remove(&client_id);
            info!(client_id = %client_id, total_clients = self.clients.len(), "client evicted");
        }
    }

    /// Seal `payload` for one target and enqueue the frame.
    ///
    /// Failures here affect only this target: a skipped target stays
    /// registered, an evicted one is removed by the caller, and dispatch
    /// continues with the remaining targets either way.
    fn encrypt_and_send(
        &self,
        sender_id: &str,
        recipient_id: &str,
        payload: &[u8],
        target: &ClientHandle,
    ) -> SendOutcome {
        let session = match self.handle.session(target.session_id) {
            Ok(Some(session)) => session,
            Ok(None) => {
                debug!(session_id = target.session_id, "unknown session for target, skipping");
                return SendOutcome::Skipped;
            }
            Err(e) => {
                warn!(session_id = target.session_id, error = %e, "session lookup failed");
                return SendOutcome::Skipped;
            }
        };

        let seq = match session.next_send_seq() {
            Ok(seq) => seq,
            Err(e) => {
                error!(session_id = target.session_id, error = %e, "send sequence exhausted");
                return SendOutcome::Evict;
            }
        };

        // The AAD carries the recipient id exactly as it appears in the
        // outgoing frame: empty for broadcast, the target's own id for
        // unicast.
        let aad = build_aad(sender_id, recipient_id, seq);

        let (ciphertext, iv) = match seal(session.key_s2c(), payload, &aad) {
            Ok(sealed) => sealed,
            Err(e) => {
                error!(session_id = target.session_id, error = %e, "failed to seal frame");
                return SendOutcome::Skipped;
            }
        };

        let frame = EncryptedFrame {
            session_id: target.session_id,
            sender_id: sender_id.to_string(),
            recipient_id: recipient_id.to_string(),
            seq_no: seq,
            content: STANDARD.encode(ciphertext),
            iv: STANDARD.encode(iv),
        };

        let text = match frame.to_json() {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, "failed to marshal encrypted frame");
                return SendOutcome::Skipped;
            }
        };

        match target.outbound.try_send(text) {
            Ok(()) => SendOutcome::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(client_id = %target.client_id, "outbound queue full, closing slow consumer");
                SendOutcome::Evict
            }
            Err(mpsc::error::TrySendError::Closed(_)) => SendOutcome::Evict,
        }
    }
}

#[cfg(test)]
mod tests {
    use cipherline_core::{MemoryStore, NewSession};
    use cipherline_crypto::{open, SessionKeys};

    use super::*;

    fn store_with_session(store: &MemoryStore, client_id: &str) -> (i64, SessionKeys) {
        let keys = SessionKeys { k_c2s: [1u8; 16], k_s2c: [client_id.len() as u8; 16] };
        let record = store
            .create(NewSession {
                client_id: client_id.to_string(),
                salt: [0u8; 32],
                keys: keys.clone(),
            })
            .unwrap();
        (record.id, keys)
    }

    struct TestPeer {
        handle: Option<ClientHandle>,
        outbound: mpsc::Receiver<String>,
        keys: SessionKeys,
        session_id: i64,
    }

    fn peer(store: &MemoryStore, hub: &HubHandle<MemoryStore>, client_id: &str) -> TestPeer {
        peer_with_capacity(store, hub, client_id, 8)
    }

    fn peer_with_capacity(
        store: &MemoryStore,
        hub: &HubHandle<MemoryStore>,
        client_id: &str,
        capacity: usize,
    ) -> TestPeer {
        let (session_id, keys) = store_with_session(store, client_id);
        let (tx, rx) = mpsc::channel(capacity);
        let handle = ClientHandle {
            client_id: client_id.to_string(),
            conn_id: hub.allocate_conn_id(),
            session_id,
            outbound: tx,
        };
        TestPeer { handle: Some(handle), outbound: rx, keys, session_id }
    }

    fn decrypt(peer: &TestPeer, text: &str) -> (EncryptedFrame, Vec<u8>) {
        let frame = EncryptedFrame::from_json(text).unwrap();
        let aad = build_aad(&frame.sender_id, &frame.recipient_id, frame.seq_no);
        let ciphertext = STANDARD.decode(&frame.content).unwrap();
        let iv = STANDARD.decode(&frame.iv).unwrap();
        let plaintext = open(&peer.keys.k_s2c, &ciphertext, &iv, &aad).unwrap();
        (frame, plaintext)
    }

    async fn settle() {
        // Let the hub task drain its queue.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    fn spawn_test_hub(store: &MemoryStore) -> (HubHandle<MemoryStore>, watch::Sender<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let hub = spawn_hub(store.clone(), shutdown_rx);
        (hub, shutdown_tx)
    }

    #[tokio::test]
    async fn broadcast_reaches_everyone_but_the_sender() {
        let store = MemoryStore::new();
        let (hub, _shutdown) = spawn_test_hub(&store);

        let mut alice = peer(&store, &hub, "alice");
        let mut bob = peer(&store, &hub, "bob");
        let mut carol = peer(&store, &hub, "carol");

        hub.register(alice.handle.take().unwrap()).await;
        hub.register(bob.handle.take().unwrap()).await;
        hub.register(carol.handle.take().unwrap()).await;

        hub.deliver("alice".into(), String::new(), b"hello all".to_vec()).await;
        settle().await;

        for peer in [&mut bob, &mut carol] {
            let text = peer.outbound.try_recv().expect("broadcast target must receive");
            let (frame, plaintext) = decrypt(peer, &text);

            assert_eq!(frame.sender_id, "alice");
            assert!(frame.recipient_id.is_empty());
            assert_eq!(frame.session_id, peer.session_id);
            assert_eq!(frame.seq_no, 1, "first frame on a fresh session");
            assert_eq!(plaintext, b"hello all");
        }

        assert!(alice.outbound.try_recv().is_err(), "sender must not hear its own broadcast");
    }

    #[tokio::test]
    async fn unicast_reaches_only_the_recipient() {
        let store = MemoryStore::new();
        let (hub, _shutdown) = spawn_test_hub(&store);

        let mut alice = peer(&store, &hub, "alice");
        let mut bob = peer(&store, &hub, "bob");
        let mut carol = peer(&store, &hub, "carol");

        hub.register(alice.handle.take().unwrap()).await;
        hub.register(bob.handle.take().unwrap()).await;
        hub.register(carol.handle.take().unwrap()).await;

        hub.deliver("alice".into(), "bob".into(), b"psst".to_vec()).await;
        settle().await;

        let text = bob.outbound.try_recv().expect("unicast target must receive");
        let (frame, plaintext) = decrypt(&bob, &text);
        assert_eq!(frame.recipient_id, "bob");
        assert_eq!(frame.sender_id, "alice");
        assert_eq!(plaintext, b"psst");

        assert!(alice.outbound.try_recv().is_err());
        assert!(carol.outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn unknown_recipient_is_dropped() {
        let store = MemoryStore::new();
        let (hub, _shutdown) = spawn_test_hub(&store);

        let mut alice = peer(&store, &hub, "alice");
        hub.register(alice.handle.take().unwrap()).await;

        hub.deliver("alice".into(), "nobody".into(), b"void".to_vec()).await;
        settle().await;

        assert!(alice.outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn sequence_numbers_increase_per_target_session() {
        let store = MemoryStore::new();
        let (hub, _shutdown) = spawn_test_hub(&store);

        let mut alice = peer(&store, &hub, "alice");
        let mut bob = peer(&store, &hub, "bob");

        hub.register(alice.handle.take().unwrap()).await;
        hub.register(bob.handle.take().unwrap()).await;

        for _ in 0..3 {
            hub.deliver("alice".into(), "bob".into(), b"tick".to_vec()).await;
        }
        settle().await;

        let seqs: Vec<u64> = (0..3)
            .map(|_| {
                let text = bob.outbound.try_recv().unwrap();
                decrypt(&bob, &text).0.seq_no
            })
            .collect();

        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn slow_consumer_is_evicted_and_others_keep_receiving() {
        let store = MemoryStore::new();
        let (hub, _shutdown) = spawn_test_hub(&store);

        // Bob's queue holds a single frame and nobody drains it.
        let mut alice = peer(&store, &hub, "alice");
        let mut bob = peer_with_capacity(&store, &hub, "bob", 1);
        let mut carol = peer(&store, &hub, "carol");

        hub.register(alice.handle.take().unwrap()).await;
        hub.register(bob.handle.take().unwrap()).await;
        hub.register(carol.handle.take().unwrap()).await;

        hub.deliver("alice".into(), String::new(), b"one".to_vec()).await;
        hub.deliver("alice".into(), String::new(), b"two".to_vec()).await;
        hub.deliver("alice".into(), String::new(), b"three".to_vec()).await;
        settle().await;

        // Carol got all three, bob only the one that fit before eviction.
        let mut carol_count = 0;
        while carol.outbound.try_recv().is_ok() {
            carol_count += 1;
        }
        assert_eq!(carol_count, 3);

        let mut bob_count = 0;
        while let Ok(_text) = bob.outbound.try_recv() {
            bob_count += 1;
        }
        assert_eq!(bob_count, 1, "slow consumer receives only what fit in its queue");
    }

    #[tokio::test]
    async fn duplicate_client_id_evicts_the_incumbent() {
        let store = MemoryStore::new();
        let (hub, _shutdown) = spawn_test_hub(&store);

        let mut first = peer(&store, &hub, "alice");
        let mut second = peer(&store, &hub, "alice");

        hub.register(first.handle.take().unwrap()).await;
        hub.register(second.handle.take().unwrap()).await;
        settle().await;

        // The first connection's queue closed when its handle was dropped.
        assert!(matches!(
            first.outbound.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));

        // The second connection is live and routable.
        let mut bob = peer(&store, &hub, "bob");
        hub.register(bob.handle.take().unwrap()).await;
        hub.deliver("bob".into(), "alice".into(), b"hi".to_vec()).await;
        settle().await;

        assert!(second.outbound.try_recv().is_ok());
    }

    #[tokio::test]
    async fn stale_unregister_does_not_remove_successor() {
        let store = MemoryStore::new();
        let (hub, _shutdown) = spawn_test_hub(&store);

        let mut first = peer(&store, &hub, "alice");
        let mut second = peer(&store, &hub, "alice");
        let first_conn_id = first.handle.as_ref().unwrap().conn_id;

        hub.register(first.handle.take().unwrap()).await;
        hub.register(second.handle.take().unwrap()).await;

        // The evicted connection reports its own departure late.
        hub.unregister("alice".into(), first_conn_id).await;

        let mut bob = peer(&store, &hub, "bob");
        hub.register(bob.handle.take().unwrap()).await;
        hub.deliver("bob".into(), "alice".into(), b"still there?".to_vec()).await;
        settle().await;

        assert!(
            second.outbound.try_recv().is_ok(),
            "successor connection must survive the stale unregister"
        );
    }

    #[tokio::test]
    async fn session_cache_returns_the_same_instance() {
        let store = MemoryStore::new();
        let (hub, _shutdown) = spawn_test_hub(&store);
        let (session_id, _) = store_with_session(&store, "alice");

        let a = hub.session(session_id).unwrap().unwrap();
        let b = hub.session(session_id).unwrap().unwrap();

        assert!(Arc::ptr_eq(&a, &b), "counters must be unified per session id");
        assert!(hub.session(9999).unwrap().is_none());
    }

    #[tokio::test]
    async fn shutdown_stops_the_hub() {
        let store = MemoryStore::new();
        let (hub, shutdown) = spawn_test_hub(&store);

        let mut alice = peer(&store, &hub, "alice");
        hub.register(alice.handle.take().unwrap()).await;

        shutdown.send(true).unwrap();
        settle().await;

        // The hub task has exited; registered queues are dropped.
        assert!(matches!(
            alice.outbound.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }
}
