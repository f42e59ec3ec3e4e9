// Copyright (c) The Corio Project Authors.
// Licensed under the MIT License.

//! Request/status line serialization, canonical header block formatting, and body writing
//! (spec §4.7 "HTTP write path").

use futures::{Stream, StreamExt};
use http::{HeaderMap, Method, StatusCode, Version};

use crate::compress::Compressor;
use crate::error::Error;

/// Which body writer to use when sending a message (spec §4.7: "exact length, chunked with a
/// configurable max chunk size, or EOF-terminated").
#[derive(Debug, Clone, Copy)]
pub enum WriteBodyMode {
    /// `Content-Length` already declares the exact byte count; write the body as-is.
    Exact,
    /// `Transfer-Encoding: chunked`, re-chunked at up to `max_chunk_size` bytes per wire chunk.
    Chunked {
        /// The largest chunk this writer will emit; the producer's pieces are re-split to fit.
        max_chunk_size: usize,
    },
    /// No framing at all; the peer is expected to detect the end via connection close.
    UntilClose,
}

fn version_token(version: Version) -> &'static str {
    match version {
        Version::HTTP_10 => "HTTP/1.0",
        _ => "HTTP/1.1",
    }
}

/// Serializes a request line: `METHOD target VERSION\r\n`.
#[must_use]
pub fn write_request_line(method: &Method, target: &str, version: Version) -> Vec<u8> {
    format!("{} {} {}\r\n", method, target, version_token(version)).into_bytes()
}

/// Serializes a status line: `VERSION status reason\r\n`.
#[must_use]
pub fn write_status_line(status: StatusCode, reason: &str, version: Version) -> Vec<u8> {
    format!("{} {} {}\r\n", version_token(version), status.as_u16(), reason).into_bytes()
}

/// Serializes the header block, terminated by the blank line that ends it.
///
/// `sorted` requests headers be emitted in name order; spec §4.7 notes this exists only to make
/// tests deterministic; real traffic is sent in insertion order.
#[must_use]
pub fn write_headers(headers: &HeaderMap, sorted: bool) -> Vec<u8> {
    let mut pairs: Vec<_> = headers.iter().collect();
    if sorted {
        pairs.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
    }

    let mut out = Vec::new();
    for (name, value) in pairs {
        out.extend_from_slice(name.as_str().as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    out
}

/// Encodes one chunked-transfer-encoding chunk: `<hex-size>\r\n<data>\r\n`.
#[must_use]
pub fn encode_chunk(data: &[u8]) -> Vec<u8> {
    let mut out = format!("{:x}\r\n", data.len()).into_bytes();
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
    out
}

/// Encodes the terminal zero-length chunk with an empty trailer section.
#[must_use]
pub fn encode_final_chunk() -> Vec<u8> {
    b"0\r\n\r\n".to_vec()
}

/// Writes a full HTTP message: `start_line` + headers + body, invoking `sink` once per piece of
/// bytes to send. `body` is the async iterator of plaintext chunks (spec §4.7: "a client body
/// producer is an async iterator of bytes"); `content_encoding`, if set, compresses it
/// transparently before chunking/framing.
///
/// # Errors
///
/// Returns whatever error the body producer yields, or a compression failure.
pub async fn write_http_message<S>(
    start_line: Vec<u8>,
    headers: &HeaderMap,
    sort_headers_for_test: bool,
    mode: WriteBodyMode,
    content_encoding: Option<&str>,
    mut body: S,
    mut sink: impl FnMut(Vec<u8>),
) -> Result<(), Error>
where
    S: Stream<Item = Result<Vec<u8>, Error>> + Unpin,
{
    let mut head = start_line;
    head.extend_from_slice(&write_headers(headers, sort_headers_for_test));
    sink(head);

    let mut compressor = match content_encoding {
        Some(encoding) => Some(Compressor::for_encoding(encoding)?),
        None => None,
    };

    match mode {
        WriteBodyMode::Exact | WriteBodyMode::UntilClose => {
            while let Some(piece) = body.next().await {
                let piece = piece?;
                let encoded = match compressor.as_mut() {
                    Some(compressor) => compressor.feed(&piece)?,
                    None => piece,
                };
                if !encoded.is_empty() {
                    sink(encoded);
                }
            }
            if let Some(compressor) = compressor {
                let tail = compressor.finish()?;
                if !tail.is_empty() {
                    sink(tail);
                }
            }
        }
        WriteBodyMode::Chunked { max_chunk_size } => {
            let max_chunk_size = max_chunk_size.max(1);
            while let Some(piece) = body.next().await {
                let piece = piece?;
                let encoded = match compressor.as_mut() {
                    Some(compressor) => compressor.feed(&piece)?,
                    None => piece,
                };
                for slice in encoded.chunks(max_chunk_size) {
                    sink(encode_chunk(slice));
                }
            }
            if let Some(compressor) = compressor {
                let tail = compressor.finish()?;
                for slice in tail.chunks(max_chunk_size) {
                    sink(encode_chunk(slice));
                }
            }
            sink(encode_final_chunk());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::task::{Context, Poll};

    use http::HeaderValue;

    use super::*;

    fn noop_waker() -> std::task::Waker {
        use std::task::{RawWaker, RawWakerVTable};
        fn no_op(_: *const ()) {}
        fn clone(_: *const ()) -> RawWaker {
            RawWaker::new(std::ptr::null(), &VTABLE)
        }
        static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, no_op, no_op, no_op);
        // SAFETY: the no-op vtable never dereferences the data pointer.
        unsafe { std::task::Waker::from_raw(RawWaker::new(std::ptr::null(), &VTABLE)) }
    }

    fn block_on<F: std::future::Future>(mut future: F) -> F::Output {
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        // SAFETY: `future` is not moved again after being pinned.
        let mut future = unsafe { std::pin::Pin::new_unchecked(&mut future) };
        loop {
            if let Poll::Ready(value) = future.as_mut().poll(&mut cx) {
                return value;
            }
        }
    }

    #[test]
    fn request_line_uses_declared_version() {
        let line = write_request_line(&Method::GET, "/", Version::HTTP_10);
        assert_eq!(line, b"GET / HTTP/1.0\r\n");
    }

    #[test]
    fn headers_can_be_sorted_for_determinism() {
        let mut headers = HeaderMap::new();
        headers.insert("zeta", HeaderValue::from_static("1"));
        headers.insert("alpha", HeaderValue::from_static("2"));

        let out = write_headers(&headers, true);
        let text = String::from_utf8(out).unwrap();
        assert!(text.find("alpha").unwrap() < text.find("zeta").unwrap());
    }

    #[test]
    fn exact_body_is_written_verbatim() {
        let headers = HeaderMap::new();
        let pieces = RefCell::new(Vec::new());
        let body = futures::stream::iter(vec![Ok(b"hello".to_vec()), Ok(b" world".to_vec())]);

        block_on(write_http_message(
            write_request_line(&Method::POST, "/", Version::HTTP_11),
            &headers,
            false,
            WriteBodyMode::Exact,
            None,
            body,
            |piece| pieces.borrow_mut().push(piece),
        ))
        .unwrap();

        let all: Vec<u8> = pieces.into_inner().into_iter().flatten().collect();
        assert!(String::from_utf8_lossy(&all).ends_with("hello world"));
    }

    #[test]
    fn chunked_body_is_split_and_terminated() {
        let headers = HeaderMap::new();
        let pieces = RefCell::new(Vec::new());
        let body = futures::stream::iter(vec![Ok(b"0123456789".to_vec())]);

        block_on(write_http_message(
            write_request_line(&Method::POST, "/", Version::HTTP_11),
            &headers,
            false,
            WriteBodyMode::Chunked { max_chunk_size: 4 },
            None,
            body,
            |piece| pieces.borrow_mut().push(piece),
        ))
        .unwrap();

        let all: Vec<u8> = pieces.into_inner().into_iter().flatten().collect();
        let text = String::from_utf8_lossy(&all);
        assert!(text.contains("4\r\n0123\r\n"));
        assert!(text.contains("4\r\n4567\r\n"));
        assert!(text.contains("2\r\n89\r\n"));
        assert!(text.ends_with("0\r\n\r\n"));
    }
}
