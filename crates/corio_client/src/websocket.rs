// Copyright (c) The Corio Project Authors.
// Licensed under the MIT License.

//! WebSocket client: the upgrade handshake plus send/recv/close (SPEC_FULL.md §11, grounded on
//! `scarletio/http_client/web_socket_context_manager.py`'s `WebSocketContextManager`).

use std::cell::Cell;
use std::sync::Arc;

use base64::Engine as _;
use futures::stream;
use futures_rustls::rustls;
use http::{HeaderMap, HeaderValue, Method, Version, header};
use rand::RngCore;
use sha1::{Digest, Sha1};
use url::Url;

use corio_http::{
    WebSocketFrame as Frame, WebSocketOpCode as OpCode, WebSocketRole as Role, WriteBodyMode,
    read_http_response, write_http_message, write_request_line,
};
use corio_rt::EventLoop;

use crate::connector::{Connection, Connector, TlsPolicy, default_tls_config};
use crate::error::{Error, Result};
use crate::helpers::is_ipv6_literal;

/// The fixed GUID [RFC 6455 §1.3] concatenates onto a client's `Sec-WebSocket-Key` before
/// hashing, to derive the expected `Sec-WebSocket-Accept`.
const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// A connected WebSocket client: an upgraded HTTP/1.1 connection speaking the RFC 6455 framing
/// in [`corio_http::websocket`] (spec §4.7 "WebSocket frame"; the context-manager-style
/// close-on-drop behavior of the original is approximated here by [`Drop`] aborting the
/// transport if [`WebSocketClient::close`] was never called).
pub struct WebSocketClient {
    connection: Connection,
    closed: Cell<bool>,
}

impl WebSocketClient {
    /// Connects to `url` (scheme must be `ws`/`wss`) and completes the HTTP upgrade handshake,
    /// using [`default_tls_config`] for `wss://`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedScheme`] for anything other than `ws`/`wss`,
    /// [`Error::Connect`] if the TCP connect fails, or [`Error::HandshakeRejected`] if the server
    /// does not answer with a valid `101 Switching Protocols` upgrade.
    pub async fn connect(event_loop: &EventLoop, url: &Url) -> Result<Self> {
        Self::connect_with(event_loop, url, HeaderMap::new(), None).await
    }

    /// As [`WebSocketClient::connect`], with additional request headers and an optional TLS
    /// config override for `wss://`.
    ///
    /// # Errors
    ///
    /// See [`WebSocketClient::connect`].
    pub async fn connect_with(
        event_loop: &EventLoop,
        url: &Url,
        extra_headers: HeaderMap,
        tls_config: Option<Arc<rustls::ClientConfig>>,
    ) -> Result<Self> {
        let tls = match url.scheme() {
            "ws" => TlsPolicy::Plain,
            "wss" => TlsPolicy::Tls(tls_config.unwrap_or_else(default_tls_config)),
            other => return Err(Error::UnsupportedScheme(other.to_string())),
        };
        let is_tls = matches!(tls, TlsPolicy::Tls(_));

        let host = url
            .host_str()
            .ok_or_else(|| Error::InvalidUrl(format!("URL has no host: {url}")))?
            .to_string();
        let port = url.port().unwrap_or(if is_tls { 443 } else { 80 });

        let connector = Connector::new(event_loop.clone());
        let connection = connector.connect(&host, port, tls).await?;

        let key = random_websocket_key();
        let headers = upgrade_request_headers(&host, port, &key, extra_headers);
        write_upgrade_request(&connection, url, &headers).await?;

        let response = read_http_response(connection.wire_in()).await?;
        verify_upgrade_response(&response, &key).inspect_err(|error| {
            tracing::warn!(%host, port, error = %error, "WebSocket upgrade handshake rejected");
        })?;
        tracing::debug!(%host, port, "WebSocket upgrade handshake completed");

        Ok(Self { connection, closed: Cell::new(false) })
    }

    /// Sends a text frame, masked as the client role requires.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] if the frame could not be constructed (it never is, for a
    /// non-control opcode).
    pub fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.send(OpCode::Text, text.into().into_bytes())
    }

    /// Sends a binary frame, masked as the client role requires.
    ///
    /// # Errors
    ///
    /// See [`WebSocketClient::send_text`].
    pub fn send_binary(&self, data: Vec<u8>) -> Result<()> {
        self.send(OpCode::Binary, data)
    }

    fn send(&self, opcode: OpCode, payload: Vec<u8>) -> Result<()> {
        let frame = Frame::new(true, opcode, payload)?;
        self.connection.write(&frame.encode(Some(random_mask())));
        Ok(())
    }

    /// Reads the next frame off the connection. Payloads arrive already unmasked (servers never
    /// mask their frames).
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the peer closed the connection before a complete
    /// frame arrived, or [`Error::Http`] on a framing violation.
    pub async fn recv(&self) -> Result<Frame> {
        if self.closed.get() {
            return Err(Error::ConnectionClosed);
        }
        let frame = Frame::read(self.connection.wire_in(), Role::Client).await?;
        if frame.opcode == OpCode::Close {
            self.closed.set(true);
        }
        Ok(frame)
    }

    /// Sends a close frame (if one hasn't already been sent or received) and closes the
    /// transport. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] only if the close frame itself could not be constructed, which
    /// never happens for an empty payload.
    pub fn close(&self) -> Result<()> {
        if !self.closed.replace(true) {
            let frame = Frame::new(true, OpCode::Close, Vec::new())?;
            self.connection.write(&frame.encode(Some(random_mask())));
        }
        self.connection.close();
        Ok(())
    }
}

impl Drop for WebSocketClient {
    fn drop(&mut self) {
        if !self.closed.replace(true) {
            self.connection.abort();
        }
    }
}

fn random_websocket_key() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn random_mask() -> [u8; 4] {
    let mut mask = [0u8; 4];
    rand::rng().fill_bytes(&mut mask);
    mask
}

fn expected_accept(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    let digest = hasher.finalize();
    base64::engine::general_purpose::STANDARD.encode(digest)
}

fn upgrade_request_headers(host: &str, port: u16, key: &str, mut headers: HeaderMap) -> HeaderMap {
    let host_value = if is_ipv6_literal(host) { format!("[{host}]:{port}") } else { format!("{host}:{port}") };
    if let Ok(value) = HeaderValue::from_str(&host_value) {
        headers.insert(header::HOST, value);
    }
    headers.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
    headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
    if let Ok(value) = HeaderValue::from_str(key) {
        headers.insert(header::SEC_WEBSOCKET_KEY, value);
    }
    headers.insert(header::SEC_WEBSOCKET_VERSION, HeaderValue::from_static("13"));
    headers
}

async fn write_upgrade_request(connection: &Connection, url: &Url, headers: &HeaderMap) -> Result<()> {
    let target = request_target(url);
    let start_line = write_request_line(&Method::GET, &target, Version::HTTP_11);
    let empty_body = stream::iter(std::iter::empty::<std::result::Result<Vec<u8>, corio_http::Error>>());

    write_http_message(start_line, headers, false, WriteBodyMode::Exact, None, empty_body, |piece| {
        connection.write(&piece);
    })
    .await?;

    Ok(())
}

fn request_target(url: &Url) -> String {
    let path = url.path();
    let mut target = if path.is_empty() { "/".to_string() } else { path.to_string() };
    if let Some(query) = url.query() {
        target.push('?');
        target.push_str(query);
    }
    target
}

fn verify_upgrade_response(response: &corio_http::ResponseHead, key: &str) -> Result<()> {
    if response.status != http::StatusCode::SWITCHING_PROTOCOLS {
        return Err(Error::HandshakeRejected(format!("expected 101 Switching Protocols, got {}", response.status)));
    }

    let upgrade_ok = response
        .headers
        .get(header::UPGRADE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.eq_ignore_ascii_case("websocket"));
    if !upgrade_ok {
        return Err(Error::HandshakeRejected("missing or unexpected Upgrade header".to_string()));
    }

    let connection_ok = response
        .headers
        .get(header::CONNECTION)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.split(',').any(|token| token.trim().eq_ignore_ascii_case("upgrade")));
    if !connection_ok {
        return Err(Error::HandshakeRejected("missing or unexpected Connection header".to_string()));
    }

    let accept = response
        .headers
        .get(header::SEC_WEBSOCKET_ACCEPT)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| Error::HandshakeRejected("missing Sec-WebSocket-Accept".to_string()))?;
    if accept != expected_accept(key) {
        return Err(Error::HandshakeRejected("Sec-WebSocket-Accept does not match the sent key".to_string()));
    }

    Ok(())
}
