// Copyright (c) The Corio Project Authors.
// Licensed under the MIT License.

use thiserror::Error;

/// A specialized `Result` for use with [`crate::HttpClient`]/[`crate::WebSocketClient`]
/// operations.
pub type Result<T> = std::result::Result<T, Error>;

/// An error originating in the Corio HTTP/WebSocket client.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The request URL could not be parsed, or named a scheme this client does not speak.
    #[error("invalid request URL: {0}")]
    InvalidUrl(String),

    /// The URL's scheme was recognized syntactically but this client has no connector for it
    /// (anything other than `http`/`https`/`ws`/`wss`).
    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    /// DNS resolution or the initial TCP connect failed for every address the resolver
    /// returned.
    #[error("could not connect to {host}:{port}: {source}")]
    Connect {
        /// The host that could not be reached.
        host: String,
        /// The port that could not be reached.
        port: u16,
        /// The last connect attempt's underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The peer closed the connection (or an I/O error occurred) before a complete response was
    /// received.
    #[error("connection closed before a complete response was received")]
    ConnectionClosed,

    /// A response arrived that did not answer an HTTP upgrade request with `101 Switching
    /// Protocols`, or otherwise did not honor the WebSocket handshake contract.
    #[error("WebSocket handshake rejected: {0}")]
    HandshakeRejected(String),

    /// Forwarded from the runtime layer (task cancellation, timeouts, executor failures).
    #[error(transparent)]
    Runtime(#[from] corio_rt::Error),

    /// Forwarded from the transport/selector layer.
    #[error(transparent)]
    Io(#[from] corio_io::Error),

    /// Forwarded from the TLS wrapper transport (handshake and certificate failures).
    #[error(transparent)]
    Tls(#[from] corio_tls::Error),

    /// Forwarded from HTTP/WebSocket wire framing (malformed responses, unsupported content
    /// encodings).
    #[error(transparent)]
    Http(#[from] corio_http::Error),

    /// Forwarded from the standard library (DNS resolution, raw socket I/O on the executor).
    #[error(transparent)]
    StdIo(#[from] std::io::Error),
}
