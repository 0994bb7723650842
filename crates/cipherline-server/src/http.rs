//! HTTP front end: key-exchange endpoint and WebSocket upgrade.
//!
//! The relay speaks exactly three things over its one listen port:
//!
//! - `POST /key-exchange`: the one-shot handshake, JSON in and out, with
//!   a CORS policy for the configured browser origins
//! - `GET /ws?clientId=..&sessionId=..`: upgrade to the chat transport
//! - `OPTIONS /key-exchange`: CORS preflight
//!
//! Routing peeks at the request line without consuming it: upgrades hand
//! the untouched stream to the WebSocket handshake, everything else goes
//! through a deliberately small HTTP/1.1 reader that understands exactly
//! what this endpoint needs (request line, headers, Content-Length body).

use std::sync::Arc;

use cipherline_core::{perform_key_exchange, Session, SessionStore};
use cipherline_crypto::ServerIdentity;
use cipherline_proto::{ErrorBody, KeyExchangeRequest};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http;
use tracing::{debug, warn};

use crate::connection::run_connection;
use crate::hub::HubHandle;

/// Maximum accepted size of a request head (request line + headers).
const MAX_HEAD_BYTES: usize = 8 * 1024;

/// Maximum accepted request body size.
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Shared state handed to every accepted socket.
pub(crate) struct AppState<S: SessionStore> {
    pub identity: Arc<ServerIdentity>,
    pub store: S,
    pub hub: HubHandle<S>,
    pub allowed_origins: Arc<Vec<String>>,
}

impl<S: SessionStore> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            identity: Arc::clone(&self.identity),
            store: self.store.clone(),
            hub: self.hub.clone(),
            allowed_origins: Arc::clone(&self.allowed_origins),
        }
    }
}

/// Route one accepted socket.
pub(crate) async fn handle_socket<S: SessionStore>(
    stream: TcpStream,
    state: AppState<S>,
    shutdown: watch::Receiver<bool>,
) {
    // Peek the request line to decide between the WebSocket upgrade (which
    // must see the unconsumed stream) and plain HTTP.
    let mut head = [0u8; 1024];
    let mut peeked = 0;
    for _ in 0..20 {
        match stream.peek(&mut head).await {
            Ok(0) => return,
            Ok(n) => {
                peeked = n;
                // Enough to match "GET /ws", or the line ended early.
                if n >= 7 || head[..n].contains(&b'\n') {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
            Err(e) => {
                debug!(error = %e, "failed to peek request");
                return;
            }
        }
    }

    if head[..peeked].starts_with(b"GET /ws") {
        serve_ws(stream, state, shutdown).await;
    } else {
        serve_http(stream, state).await;
    }
}

/// Complete the WebSocket upgrade and run the connection.
///
/// `clientId` and `sessionId` come from the query string and are validated
/// during the handshake callback, so a bad request is rejected with an
/// HTTP error before the upgrade completes: missing parameters and unknown
/// sessions never reach the hub.
async fn serve_ws<S: SessionStore>(
    stream: TcpStream,
    state: AppState<S>,
    shutdown: watch::Receiver<bool>,
) {
    let hub = state.hub.clone();
    let mut bound: Option<(String, Arc<Session>)> = None;

    let callback = |req: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let query = req.uri().query().unwrap_or_default();

        let mut client_id = None;
        let mut session_id = None;
        for (key, value) in parse_query(query) {
            match key.as_str() {
                "clientId" => client_id = Some(value),
                "sessionId" => session_id = Some(value),
                _ => {}
            }
        }

        let client_id = match client_id.filter(|id| !id.is_empty()) {
            Some(id) => id,
            None => return Err(reject(400, "missing clientId")),
        };
        let session_id: i64 = match session_id.and_then(|raw| raw.parse().ok()) {
            Some(id) => id,
            None => return Err(reject(400, "missing or invalid sessionId")),
        };

        match hub.session(session_id) {
            Ok(Some(session)) => {
                bound = Some((client_id, session));
                Ok(response)
            }
            Ok(None) => Err(reject(400, "unknown session")),
            Err(e) => {
                warn!(session_id, error = %e, "session lookup failed during upgrade");
                Err(reject(500, "session lookup failed"))
            }
        }
    };

    match accept_hdr_async(stream, callback).await {
        Ok(ws) => {
            let Some((client_id, session)) = bound else {
                // The callback ran and accepted, so this cannot happen.
                return;
            };
            run_connection(ws, client_id, session, state.hub, shutdown).await;
        }
        Err(e) => {
            debug!(error = %e, "websocket upgrade rejected");
        }
    }
}

fn reject(status: u16, message: &str) -> ErrorResponse {
    http::Response::builder()
        .status(status)
        .body(Some(message.to_string()))
        .expect("invariant: static status and body are a valid response")
}

/// Handle one plain HTTP exchange and close the connection.
async fn serve_http<S: SessionStore>(stream: TcpStream, state: AppState<S>) {
    let mut io = BufReader::new(stream);

    let request = match read_request(&mut io).await {
        Ok(Some(request)) => request,
        Ok(None) => return,
        Err(e) => {
            debug!(error = %e, "failed to read http request");
            return;
        }
    };

    let cors = cors_headers(request.header("origin"), &state.allowed_origins);

    let outcome = match (request.method.as_str(), request.path()) {
        ("OPTIONS", "/key-exchange") => write_response(&mut io, 204, &cors, b"").await,
        ("POST", "/key-exchange") => {
            let (status, body) = key_exchange_response(&state, &request.body);
            write_response(&mut io, status, &cors, &body).await
        }
        (_, "/key-exchange") => {
            let body = error_body("method not allowed");
            write_response(&mut io, 405, &cors, &body).await
        }
        _ => {
            let body = error_body("not found");
            write_response(&mut io, 404, &cors, &body).await
        }
    };

    if let Err(e) = outcome {
        debug!(error = %e, "failed to write http response");
    }
}

/// Run the key exchange and shape the HTTP answer.
fn key_exchange_response<S: SessionStore>(state: &AppState<S>, body: &[u8]) -> (u16, Vec<u8>) {
    let request: KeyExchangeRequest = match serde_json::from_slice(body) {
        Ok(request) => request,
        Err(e) => {
            debug!(error = %e, "key exchange request is not valid json");
            return (400, error_body("invalid json"));
        }
    };

    match perform_key_exchange(state.identity.as_ref(), &state.store, &request) {
        Ok(response) => match serde_json::to_vec(&response) {
            Ok(body) => (200, body),
            Err(e) => {
                warn!(error = %e, "failed to serialize key exchange response");
                (500, error_body("internal server error"))
            }
        },
        Err(e) => (e.status(), error_body(&e.to_string())),
    }
}

fn error_body(message: &str) -> Vec<u8> {
    serde_json::to_vec(&ErrorBody::new(message)).unwrap_or_else(|_| b"{}".to_vec())
}

/// A parsed HTTP request, just enough for this endpoint.
struct HttpRequest {
    method: String,
    target: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl HttpRequest {
    fn path(&self) -> &str {
        self.target.split('?').next().unwrap_or(&self.target)
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Read one request from the stream.
///
/// Returns `Ok(None)` for connections that close early or exceed the size
/// limits; those are dropped without a response.
async fn read_request<R: AsyncBufRead + Unpin>(
    reader: &mut R,
) -> std::io::Result<Option<HttpRequest>> {
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(None);
    }

    let mut parts = line.split_whitespace();
    let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
        return Ok(None);
    };
    let method = method.to_string();
    let target = target.to_string();

    let mut headers = Vec::new();
    let mut head_bytes = line.len();
    loop {
        let mut header_line = String::new();
        if reader.read_line(&mut header_line).await? == 0 {
            return Ok(None);
        }
        head_bytes += header_line.len();
        if head_bytes > MAX_HEAD_BYTES {
            return Ok(None);
        }

        let trimmed = header_line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }
        if let Some((name, value)) = trimmed.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }

    let content_length = headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.parse::<usize>().ok())
        .unwrap_or(0);

    if content_length > MAX_BODY_BYTES {
        return Ok(None);
    }

    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).await?;

    Ok(Some(HttpRequest { method, target, headers, body }))
}

/// Write a response and close the stream.
async fn write_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    status: u16,
    extra_headers: &[String],
    body: &[u8],
) -> std::io::Result<()> {
    let mut response = format!("HTTP/1.1 {} {}\r\n", status, reason(status));
    for header in extra_headers {
        response.push_str(header);
        response.push_str("\r\n");
    }
    if !body.is_empty() {
        response.push_str("Content-Type: application/json\r\n");
    }
    response.push_str(&format!("Content-Length: {}\r\n", body.len()));
    response.push_str("Connection: close\r\n\r\n");

    writer.write_all(response.as_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    writer.shutdown().await
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        _ => "",
    }
}

/// CORS headers for the key-exchange endpoint.
///
/// Echoes the origin back only when it is on the configured allow list;
/// method and header allowances are constant.
fn cors_headers(origin: Option<&str>, allowed_origins: &[String]) -> Vec<String> {
    let mut headers = vec![
        "Access-Control-Allow-Methods: POST, OPTIONS".to_string(),
        "Access-Control-Allow-Headers: Content-Type, Authorization".to_string(),
    ];

    if let Some(origin) = origin {
        let allowed = allowed_origins.iter().any(|entry| entry == origin || entry == "*");
        if allowed {
            headers.push(format!("Access-Control-Allow-Origin: {origin}"));
            headers.push("Access-Control-Allow-Credentials: true".to_string());
            headers.push("Vary: Origin".to_string());
        }
    }

    headers
}

/// Split a query string into decoded key/value pairs.
fn parse_query(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (percent_decode(key), percent_decode(value))
        })
        .collect()
}

/// Minimal percent-decoding for query components (`%XX` and `+`).
fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 3 <= bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                if let Some(byte) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    out.push(byte);
                    i += 3;
                } else {
                    out.push(b'%');
                    i += 1;
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            byte => {
                out.push(byte);
                i += 1;
            }
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}
