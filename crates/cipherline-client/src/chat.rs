//! Encrypted chat transport over WebSocket.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use cipherline_core::Session;
use cipherline_crypto::{open, seal};
use cipherline_proto::{build_aad, EncryptedFrame};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::error::ClientError;

/// A decrypted frame received from the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEvent {
    /// Client id of the original sender.
    pub sender_id: String,
    /// Recipient as stamped by the relay; empty for broadcast.
    pub recipient_id: String,
    /// Sequence number assigned to this frame for our session.
    pub seq_no: u64,
    /// Decrypted message payload.
    pub plaintext: Vec<u8>,
}

/// Connected chat client bound to one established session.
///
/// Sending seals under the client-to-server key with a fresh sequence
/// number; receiving mirrors the relay's validation (session binding,
/// watermark, associated data) before opening under the server-to-client
/// key. Frames that fail validation are dropped silently, exactly as the
/// relay drops ours.
pub struct ChatClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    session: Arc<Session>,
    client_id: String,
}

impl ChatClient {
    /// Open the chat transport for an established session.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Transport`] if the WebSocket connect fails (which
    ///   includes the server rejecting the upgrade for an unknown
    ///   session).
    pub async fn connect(
        server_addr: &str,
        client_id: &str,
        session: Arc<Session>,
    ) -> Result<Self, ClientError> {
        let url = format!(
            "ws://{server_addr}/ws?clientId={}&sessionId={}",
            encode_query_component(client_id),
            session.id()
        );

        let (ws, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| ClientError::Transport(format!("websocket connect failed: {e}")))?;

        Ok(Self { ws, session, client_id: client_id.to_string() })
    }

    /// The session this client is bound to.
    #[must_use]
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Seal and send a message.
    ///
    /// An empty `recipient` broadcasts to every other connected client.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Sequence`] if the send counter overflowed.
    /// - [`ClientError::Crypto`] if sealing fails.
    /// - [`ClientError::Transport`] if the write fails.
    pub async fn send_to(&mut self, recipient: &str, plaintext: &[u8]) -> Result<(), ClientError> {
        let seq = self.session.next_send_seq()?;
        let aad = build_aad(&self.client_id, recipient, seq);
        let (ciphertext, iv) = seal(self.session.key_c2s(), plaintext, &aad)?;

        let frame = EncryptedFrame {
            session_id: self.session.id(),
            sender_id: self.client_id.clone(),
            recipient_id: recipient.to_string(),
            seq_no: seq,
            content: STANDARD.encode(ciphertext),
            iv: STANDARD.encode(iv),
        };

        self.send_frame(&frame).await
    }

    /// Send a pre-sealed frame verbatim.
    ///
    /// Bypasses sequence assignment; useful for testing relay behavior
    /// with duplicated or hand-crafted frames.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Transport`] if the write fails.
    pub async fn send_frame(&mut self, frame: &EncryptedFrame) -> Result<(), ClientError> {
        let text = frame.to_json()?;
        self.ws
            .send(Message::Text(text))
            .await
            .map_err(|e| ClientError::Transport(format!("websocket send failed: {e}")))
    }

    /// Receive the next deliverable message.
    ///
    /// Invalid, replayed, or undecryptable frames are skipped. Returns
    /// `None` once the connection is closed.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Transport`] on a read failure.
    pub async fn recv(&mut self) -> Result<Option<ChatEvent>, ClientError> {
        loop {
            let message = match self.ws.next().await {
                None => return Ok(None),
                Some(Err(e)) => {
                    return Err(ClientError::Transport(format!("websocket read failed: {e}")));
                }
                Some(Ok(message)) => message,
            };

            match message {
                Message::Text(text) => {
                    if let Some(event) = self.decode_frame(&text) {
                        return Ok(Some(event));
                    }
                }
                Message::Close(_) => return Ok(None),
                _ => {}
            }
        }
    }

    /// Send a close frame and drop the connection.
    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }

    /// Validate and decrypt one inbound frame; `None` drops it.
    fn decode_frame(&self, text: &str) -> Option<ChatEvent> {
        let frame = match EncryptedFrame::from_json(text) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, "dropping malformed frame");
                return None;
            }
        };

        if !frame.has_ciphertext() {
            return None;
        }

        if frame.session_id != self.session.id() {
            debug!(frame_session = frame.session_id, "dropping frame for another session");
            return None;
        }

        if !self.session.advance_recv_seq(frame.seq_no) {
            debug!(seq_no = frame.seq_no, "dropping replayed frame");
            return None;
        }

        let ciphertext = STANDARD.decode(&frame.content).ok()?;
        let iv = STANDARD.decode(&frame.iv).ok()?;
        let aad = build_aad(&frame.sender_id, &frame.recipient_id, frame.seq_no);

        match open(self.session.key_s2c(), &ciphertext, &iv, &aad) {
            Ok(plaintext) => Some(ChatEvent {
                sender_id: frame.sender_id,
                recipient_id: frame.recipient_id,
                seq_no: frame.seq_no,
                plaintext,
            }),
            Err(e) => {
                debug!(seq_no = frame.seq_no, error = %e, "dropping undecryptable frame");
                None
            }
        }
    }
}

/// Percent-encode a query component (conservative: everything but
/// unreserved characters).
fn encode_query_component(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
