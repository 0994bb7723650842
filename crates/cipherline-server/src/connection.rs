//! Per-connection read and write pumps.
//!
//! Each WebSocket gets two serial loops: the read pump validates and
//! decrypts inbound frames and hands the plaintext to the hub; the write
//! pump drains the bounded outbound queue onto the transport. Either pump
//! exiting tears the connection down exactly once, regardless of whether
//! the trigger was a transport error, hub eviction, or process shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use cipherline_core::{Session, SessionStore};
use cipherline_crypto::open;
use cipherline_proto::{build_aad, EncryptedFrame};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, warn};

use crate::hub::HubHandle;

/// Outbound queue capacity per connection, in frames.
///
/// A consumer that falls this far behind is considered broken and is
/// closed rather than allowed to stall the hub.
pub(crate) const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// The hub's view of one live connection.
pub(crate) struct ClientHandle {
    /// Client id, unique within the live population.
    pub client_id: String,
    /// Process-unique id of this connection instance.
    pub conn_id: u64,
    /// Session this connection is bound to.
    pub session_id: i64,
    /// Producer side of the outbound frame queue.
    pub outbound: mpsc::Sender<String>,
}

/// Idempotent teardown for one connection.
///
/// Both pumps call [`Closer::close`] on exit and the hub may trigger it
/// indirectly by dropping the outbound queue; only the first call
/// unregisters from the hub and wakes the sibling pump.
struct Closer<S: SessionStore> {
    fired: AtomicBool,
    closed: watch::Sender<bool>,
    hub: HubHandle<S>,
    client_id: String,
    conn_id: u64,
}

impl<S: SessionStore> Closer<S> {
    async fn close(&self) {
        if self.fired.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.closed.send(true);
        self.hub.unregister(self.client_id.clone(), self.conn_id).await;
        debug!(client_id = %self.client_id, conn_id = self.conn_id, "connection closed");
    }
}

/// Drive one upgraded WebSocket until it closes.
///
/// Registers with the hub, runs the write pump as a task and the read pump
/// inline, and guarantees the close handler fires exactly once.
pub(crate) async fn run_connection<S: SessionStore>(
    ws: WebSocketStream<TcpStream>,
    client_id: String,
    session: Arc<Session>,
    hub: HubHandle<S>,
    shutdown: watch::Receiver<bool>,
) {
    let conn_id = hub.allocate_conn_id();
    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
    let (closed_tx, closed_rx) = watch::channel(false);

    let closer = Arc::new(Closer {
        fired: AtomicBool::new(false),
        closed: closed_tx,
        hub: hub.clone(),
        client_id: client_id.clone(),
        conn_id,
    });

    hub.register(ClientHandle {
        client_id: client_id.clone(),
        conn_id,
        session_id: session.id(),
        outbound: outbound_tx,
    })
    .await;

    let (sink, stream) = ws.split();

    let write_closer = Arc::clone(&closer);
    let write_task = tokio::spawn(write_pump(
        sink,
        outbound_rx,
        shutdown.clone(),
        closed_rx.clone(),
        write_closer,
    ));

    read_pump(stream, &client_id, &session, &hub, shutdown, closed_rx).await;
    closer.close().await;

    // The close signal above wakes the write pump; wait for it to flush
    // its close frame.
    let _ = write_task.await;
}

async fn read_pump<S: SessionStore>(
    mut stream: SplitStream<WebSocketStream<TcpStream>>,
    client_id: &str,
    session: &Arc<Session>,
    hub: &HubHandle<S>,
    mut shutdown: watch::Receiver<bool>,
    mut closed: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = closed.changed() => return,
            msg = stream.next() => {
                match msg {
                    None => return,
                    Some(Err(e)) => {
                        debug!(client_id = %client_id, error = %e, "websocket read failed");
                        return;
                    }
                    Some(Ok(Message::Text(text))) => {
                        handle_inbound(&text, client_id, session, hub).await;
                    }
                    Some(Ok(Message::Close(_))) => return,
                    // Pings are answered by the transport layer; binary
                    // frames are not part of the protocol.
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

/// Validate, decrypt, and forward one inbound frame.
///
/// Drops are silent to the peer: a bad frame never tears the connection
/// down, it just does not get delivered.
async fn handle_inbound<S: SessionStore>(
    text: &str,
    client_id: &str,
    session: &Arc<Session>,
    hub: &HubHandle<S>,
) {
    let frame = match EncryptedFrame::from_json(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(client_id = %client_id, error = %e, "invalid websocket payload");
            return;
        }
    };

    if !frame.has_ciphertext() {
        debug!(client_id = %client_id, "dropping unencrypted frame; handshake likely incomplete");
        return;
    }

    if frame.session_id != session.id() {
        warn!(
            client_id = %client_id,
            frame_session = frame.session_id,
            bound_session = session.id(),
            "dropping frame for another session"
        );
        return;
    }

    if !session.advance_recv_seq(frame.seq_no) {
        warn!(
            client_id = %client_id,
            seq_no = frame.seq_no,
            watermark = session.recv_seq(),
            "dropping replayed or out-of-order frame"
        );
        return;
    }

    let ciphertext = match STANDARD.decode(&frame.content) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(client_id = %client_id, error = %e, "frame content is not base64");
            return;
        }
    };
    let iv = match STANDARD.decode(&frame.iv) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(client_id = %client_id, error = %e, "frame iv is not base64");
            return;
        }
    };

    let aad = build_aad(&frame.sender_id, &frame.recipient_id, frame.seq_no);

    let plaintext = match open(session.key_c2s(), &ciphertext, &iv, &aad) {
        Ok(plaintext) => plaintext,
        Err(e) => {
            warn!(client_id = %client_id, seq_no = frame.seq_no, error = %e, "failed to decrypt frame");
            return;
        }
    };

    // The sender identity is the connection's, not whatever the frame
    // claims; a spoofed sender_id only breaks the frame's own AAD.
    hub.deliver(client_id.to_string(), frame.recipient_id, plaintext).await;
}

async fn write_pump<S: SessionStore>(
    mut sink: SplitSink<WebSocketStream<TcpStream>, Message>,
    mut outbound: mpsc::Receiver<String>,
    mut shutdown: watch::Receiver<bool>,
    mut closed: watch::Receiver<bool>,
    closer: Arc<Closer<S>>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = closed.changed() => break,
            msg = outbound.recv() => {
                match msg {
                    // Queue closed: the hub dropped this connection.
                    None => break,
                    Some(text) => {
                        if let Err(e) = sink.send(Message::Text(text)).await {
                            debug!(error = %e, "websocket write failed");
                            break;
                        }
                    }
                }
            }
        }
    }

    let _ = sink.close().await;
    closer.close().await;
}
