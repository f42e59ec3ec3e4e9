// Copyright (c) The Corio Project Authors.
// Licensed under the MIT License.

use thiserror::Error;

/// Errors arising from HTTP/1.1 or WebSocket wire framing (spec §7 "Payload error").
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Malformed request/status line, header block, or chunked/WebSocket framing. Per spec §7,
    /// the connection that produced this is no longer reusable.
    #[error("malformed HTTP/WebSocket framing: {0}")]
    Payload(String),

    /// `Content-Encoding` named something other than `identity`, `gzip`, `deflate`, or `br`
    /// (spec §4.7).
    #[error("unsupported content encoding: {0}")]
    UnsupportedEncoding(String),

    /// A decompressor (gzip/deflate/br) rejected its input stream.
    #[error("decompression failed: {0}")]
    Decompress(String),

    /// An encoder (gzip/deflate/br) reported an I/O failure while compressing a write-path body.
    #[error("compression failed: {0}")]
    Compress(String),

    /// Bytes claimed to be UTF-8 (a header value, a request line) were not.
    #[error(transparent)]
    Utf8(#[from] std::str::Utf8Error),

    /// Forwarded I/O error from the underlying transport.
    #[error(transparent)]
    StdIo(#[from] std::io::Error),
}

/// A specialized `Result` for use with HTTP/WebSocket framing operations.
pub type Result<T> = std::result::Result<T, Error>;
