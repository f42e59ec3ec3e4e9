// Copyright (c) The Corio Project Authors.
// Licensed under the MIT License.

//! Request/status line and header-block parsing, body-mode selection, and the body pump that
//! ties a raw wire [`PayloadStream`] to a decoded, decompressed consumer-facing one (spec §4.7
//! "HTTP read protocol and payload stream").

use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Version};

use corio_mem::{ProvideMemory, Sequence};

use crate::decompress::Decompressor;
use crate::error::Error;
use crate::payload_stream::PayloadStream;

/// A parsed HTTP request line plus header block.
#[derive(Debug, Clone)]
pub struct RequestHead {
    /// The request method.
    pub method: Method,
    /// The raw request-target, exactly as it appeared on the wire (origin-form, absolute-form,
    /// authority-form for `CONNECT`, or `*` for server-wide `OPTIONS`).
    pub target: String,
    /// The declared HTTP version.
    pub version: Version,
    /// The request headers, in wire order, case-insensitively keyed and multi-valued.
    pub headers: HeaderMap,
}

/// A parsed HTTP status line plus header block.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    /// The response status code.
    pub status: StatusCode,
    /// The status line's reason phrase, verbatim.
    pub reason: String,
    /// The declared HTTP version.
    pub version: Version,
    /// The response headers, in wire order, case-insensitively keyed and multi-valued.
    pub headers: HeaderMap,
}

/// Which body reader the protocol selected for a message (spec §4.7 "Body selection").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyMode {
    /// `Transfer-Encoding: chunked`.
    Chunked,
    /// `Content-Length: N`, read exactly that many bytes.
    ContentLength(u64),
    /// No framing header present; read until the connection closes.
    UntilClose,
    /// No body at all.
    Empty,
}

/// Reads a CRLF-terminated line and strips the trailing CRLF.
///
/// # Errors
///
/// Forwards [`PayloadStream`] errors, and returns [`Error::Utf8`] if the line isn't valid UTF-8.
async fn read_line(stream: &PayloadStream) -> Result<String, Error> {
    let raw = stream.read_until(b"\r\n".to_vec()).await?.into_bytes();
    let without_crlf = &raw[..raw.len().saturating_sub(2)];
    Ok(std::str::from_utf8(without_crlf)?.to_string())
}

/// Reads header lines until the blank line that terminates the block, folding continuation
/// lines (those starting with whitespace) into the immediately preceding value with a single
/// space (spec §4.7: "fold into the preceding value with a single space").
async fn read_header_lines(stream: &PayloadStream) -> Result<Vec<(String, String)>, Error> {
    let mut headers: Vec<(String, String)> = Vec::new();

    loop {
        let line = read_line(stream).await?;
        if line.is_empty() {
            break;
        }

        if line.starts_with(' ') || line.starts_with('\t') {
            let Some((_, last_value)) = headers.last_mut() else {
                return Err(Error::Payload(
                    "header continuation line with no preceding header".to_string(),
                ));
            };
            last_value.push(' ');
            last_value.push_str(line.trim());
            continue;
        }

        let Some((name, value)) = line.split_once(':') else {
            return Err(Error::Payload(format!("malformed header line: {line:?}")));
        };
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }

    Ok(headers)
}

fn build_header_map(pairs: Vec<(String, String)>) -> Result<HeaderMap, Error> {
    let mut map = HeaderMap::new();
    for (name, value) in pairs {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| Error::Payload(format!("invalid header name: {name:?}")))?;
        let header_value = HeaderValue::from_str(&value)
            .map_err(|_| Error::Payload(format!("invalid header value: {value:?}")))?;
        map.append(header_name, header_value);
    }
    Ok(map)
}

fn parse_http_version(token: &str) -> Result<Version, Error> {
    match token {
        "HTTP/1.0" => Ok(Version::HTTP_10),
        "HTTP/1.1" => Ok(Version::HTTP_11),
        other => Err(Error::Payload(format!("unsupported HTTP version: {other:?}"))),
    }
}

/// Reads a request line and header block (spec §4.7: `read_http_request`).
///
/// # Errors
///
/// Returns [`Error::Payload`] on a malformed start line or header block, or forwards the
/// underlying stream's error.
pub async fn read_http_request(stream: &PayloadStream) -> Result<RequestHead, Error> {
    let line = read_line(stream).await?;
    let mut parts = line.splitn(3, ' ');
    let method = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::Payload(format!("malformed request line: {line:?}")))?;
    let target = parts
        .next()
        .ok_or_else(|| Error::Payload(format!("malformed request line: {line:?}")))?;
    let version_token = parts
        .next()
        .ok_or_else(|| Error::Payload(format!("malformed request line: {line:?}")))?;

    let method = Method::from_bytes(method.as_bytes())
        .map_err(|_| Error::Payload(format!("invalid method: {method:?}")))?;
    let version = parse_http_version(version_token)?;
    let headers = build_header_map(read_header_lines(stream).await?)?;

    Ok(RequestHead {
        method,
        target: target.to_string(),
        version,
        headers,
    })
}

/// Reads a status line and header block (spec §4.7: `read_http_response`).
///
/// # Errors
///
/// Returns [`Error::Payload`] on a malformed start line or header block, or forwards the
/// underlying stream's error.
pub async fn read_http_response(stream: &PayloadStream) -> Result<ResponseHead, Error> {
    let line = read_line(stream).await?;
    let mut parts = line.splitn(3, ' ');
    let version_token = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::Payload(format!("malformed status line: {line:?}")))?;
    let status_token = parts
        .next()
        .ok_or_else(|| Error::Payload(format!("malformed status line: {line:?}")))?;
    let reason = parts.next().unwrap_or("").to_string();

    let version = parse_http_version(version_token)?;
    let status = StatusCode::from_bytes(status_token.as_bytes())
        .map_err(|_| Error::Payload(format!("invalid status code: {status_token:?}")))?;
    let headers = build_header_map(read_header_lines(stream).await?)?;

    Ok(ResponseHead {
        status,
        reason,
        version,
        headers,
    })
}

/// Chooses exactly one body reader from the parsed headers (spec §4.7 "Body selection").
///
/// # Errors
///
/// Returns [`Error::Payload`] if `Content-Length` is present but not a valid decimal integer, or
/// if `Transfer-Encoding`/`Connection` aren't valid UTF-8.
pub fn select_body_mode(headers: &HeaderMap, version: Version) -> Result<BodyMode, Error> {
    if let Some(value) = headers.get(http::header::TRANSFER_ENCODING) {
        let value = value
            .to_str()
            .map_err(|_| Error::Payload("non-UTF-8 Transfer-Encoding".to_string()))?;
        if value.split(',').any(|token| token.trim().eq_ignore_ascii_case("chunked")) {
            return Ok(BodyMode::Chunked);
        }
    }

    if let Some(value) = headers.get(http::header::CONTENT_LENGTH) {
        let value = value
            .to_str()
            .map_err(|_| Error::Payload("non-UTF-8 Content-Length".to_string()))?;
        let length: u64 = value
            .trim()
            .parse()
            .map_err(|_| Error::Payload(format!("invalid Content-Length: {value:?}")))?;
        return Ok(BodyMode::ContentLength(length));
    }

    let connection = headers
        .get(http::header::CONNECTION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let explicit_close = connection.eq_ignore_ascii_case("close");
    let keep_alive_requested = connection.eq_ignore_ascii_case("keep-alive");

    if explicit_close || (version == Version::HTTP_10 && !keep_alive_requested) {
        return Ok(BodyMode::UntilClose);
    }

    Ok(BodyMode::Empty)
}

/// Reads `mode`'s body from `source`, optionally decompressing it per `content_encoding`, and
/// feeds the decoded bytes to `output` as they arrive. Always completes `output` exactly once,
/// with an error if one occurred.
///
/// # Errors
///
/// Returns whatever error caused the body read to fail; the same error is also delivered to
/// `output`'s completion.
pub async fn pump_body(
    source: &PayloadStream,
    mode: BodyMode,
    content_encoding: Option<&str>,
    output: &PayloadStream,
    memory: &impl ProvideMemory,
) -> Result<(), Error> {
    let result = pump_body_inner(source, mode, content_encoding, output, memory).await;
    match &result {
        Ok(()) => output.finish(None),
        Err(error) => {
            // Per spec §7: a payload error closes the protocol and the connection is no longer
            // reusable, so this is worth a `warn!` rather than a silent propagation.
            tracing::warn!(error = %error, ?mode, "HTTP body read failed; connection is not reusable");
            output.finish(Some(Error::Payload(error.to_string())));
        }
    }
    result
}

async fn pump_body_inner(
    source: &PayloadStream,
    mode: BodyMode,
    content_encoding: Option<&str>,
    output: &PayloadStream,
    memory: &impl ProvideMemory,
) -> Result<(), Error> {
    let mut decompressor = match content_encoding {
        Some(encoding) => Some(Decompressor::for_encoding(encoding)?),
        None => None,
    };

    match mode {
        BodyMode::Chunked => loop {
            let size_line = read_line(source).await?;
            let size_token = size_line.split(';').next().unwrap_or("").trim();
            let size = usize::from_str_radix(size_token, 16)
                .map_err(|_| Error::Payload(format!("invalid chunk size: {size_line:?}")))?;

            if size == 0 {
                let _trailers = read_header_lines(source).await?;
                break;
            }

            let chunk = source.read_exactly(size).await?.into_bytes();
            let terminator = source.read_exactly(2).await?.into_bytes();
            if terminator.as_ref() != b"\r\n" {
                return Err(Error::Payload("chunk not terminated by CRLF".to_string()));
            }
            emit(output, &mut decompressor, &chunk, memory)?;
        },
        BodyMode::ContentLength(total) => {
            let mut remaining = total;
            while remaining > 0 {
                let take = usize::try_from(remaining.min(64 * 1024))
                    .map_err(|_| Error::Payload("Content-Length overflows usize".to_string()))?;
                let chunk = source.read_exactly(take).await?.into_bytes();
                #[allow(clippy::cast_possible_truncation)]
                {
                    remaining -= take as u64;
                }
                emit(output, &mut decompressor, &chunk, memory)?;
            }
        }
        BodyMode::UntilClose => loop {
            let chunk = source.read_chunk().await?;
            if chunk.is_empty() {
                break;
            }
            emit(output, &mut decompressor, &chunk.into_bytes(), memory)?;
        },
        BodyMode::Empty => {}
    }

    if let Some(decompressor) = decompressor {
        let tail = decompressor.finish()?;
        if !tail.is_empty() {
            output.add_received_chunk(Sequence::from_bytes(tail, memory));
        }
    }

    Ok(())
}

fn emit(
    output: &PayloadStream,
    decompressor: &mut Option<Decompressor>,
    raw: &[u8],
    memory: &impl ProvideMemory,
) -> Result<(), Error> {
    let decoded = match decompressor {
        Some(decompressor) => decompressor.feed(raw)?,
        None => raw.to_vec(),
    };
    if !decoded.is_empty() {
        output.add_received_chunk(Sequence::from_bytes(decoded, memory));
    }
    Ok(())
}
