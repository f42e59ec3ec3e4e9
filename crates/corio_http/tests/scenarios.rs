// Copyright (c) The Corio Project Authors.
// Licensed under the MIT License.

//! The literal end-to-end scenarios of spec §8, exercised against the public API.

use std::num::NonZero;
use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

use corio_http::{
    BasicAuthorization, BodyMode, KeepAliveInfo, PayloadStream, WebSocketFrame, WebSocketOpCode,
    WebSocketRole, pump_body,
};
use corio_mem::{DefaultMemoryPool, Sequence};

fn pool() -> DefaultMemoryPool {
    DefaultMemoryPool::new(NonZero::new(4096).unwrap())
}

fn feed(stream: &PayloadStream, bytes: &[u8]) {
    stream.add_received_chunk(Sequence::from_bytes(bytes.to_vec(), &pool()));
}

fn noop_waker() -> Waker {
    fn no_op(_: *const ()) {}
    fn clone(_: *const ()) -> RawWaker {
        RawWaker::new(std::ptr::null(), &VTABLE)
    }
    static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, no_op, no_op, no_op);
    // SAFETY: the no-op vtable never dereferences the data pointer.
    unsafe { Waker::from_raw(RawWaker::new(std::ptr::null(), &VTABLE)) }
}

/// These scenarios only ever await futures that are already ready by the time they're polled
/// (the wire bytes are fed in full before the read starts), so a single immediate poll always
/// suffices; this mirrors the helper `corio_http::read`'s own unit tests use.
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

/// Scenario 1: "Feed `5\r\nhey m\r\n5\r\nister\r\n0\r\n\r\n` after a `Transfer-Encoding: chunked`
/// header. Consumer observes chunks `b"hey m"`, `b"ister"`, then EOF."
#[test]
fn chunked_decode() {
    let wire = PayloadStream::new();
    feed(&wire, b"5\r\nhey m\r\n5\r\nister\r\n0\r\n\r\n");
    wire.finish(None);

    let output = PayloadStream::new();
    block_on(pump_body(&wire, BodyMode::Chunked, None, &output, &pool())).expect("chunked body pumps without error");

    let body = block_on(output.read_to_end()).expect("reads to EOF");
    assert_eq!(body.into_bytes().as_ref(), b"hey mister");
}

/// Scenario 2: "Same framing but each chunk carries gzip-deflated bytes of `b"hey mister"`.
/// Consumer observes decompressed bytes totalling `b"hey mister"`... final read returns `b""`."
#[test]
fn gzip_plus_chunked_decode() {
    use std::io::Write as _;

    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(b"hey mister").unwrap();
    let compressed = encoder.finish().unwrap();

    // Split the compressed payload across two chunks arbitrarily, per the scenario's "split
    // arbitrarily across reads".
    let midpoint = compressed.len() / 2;
    let wire = PayloadStream::new();
    let mut framed = Vec::new();
    for piece in [&compressed[..midpoint], &compressed[midpoint..]] {
        framed.extend_from_slice(format!("{:x}\r\n", piece.len()).as_bytes());
        framed.extend_from_slice(piece);
        framed.extend_from_slice(b"\r\n");
    }
    framed.extend_from_slice(b"0\r\n\r\n");
    feed(&wire, &framed);
    wire.finish(None);

    let output = PayloadStream::new();
    block_on(pump_body(&wire, BodyMode::Chunked, Some("gzip"), &output, &pool()))
        .expect("gzip chunked body pumps without error");

    let body = block_on(output.read_to_end()).expect("reads to EOF");
    assert_eq!(body.into_bytes().as_ref(), b"hey mister");

    let tail = block_on(output.read_to_end()).expect("reads again");
    assert!(tail.is_empty(), "a second read after EOF returns no further bytes");
}

/// Scenario 3: "Bytes `0x82 0x8A <mask=b"orin"> <xor(b"hey mister", mask)>` yield a frame with
/// FIN=true, opcode=binary, payload `b"hey mister"`."
#[test]
fn websocket_masked_frame() {
    let mask = *b"orin";
    let payload = b"hey mister";
    let masked: Vec<u8> = payload.iter().enumerate().map(|(i, b)| b ^ mask[i % 4]).collect();

    let mut wire_bytes = vec![0x82, 0x8A];
    wire_bytes.extend_from_slice(&mask);
    wire_bytes.extend_from_slice(&masked);

    let wire = PayloadStream::new();
    feed(&wire, &wire_bytes);
    wire.finish(None);

    let frame = block_on(WebSocketFrame::read(&wire, WebSocketRole::Server)).expect("reads a well-formed masked frame");

    assert!(frame.final_fragment);
    assert_eq!(frame.opcode, WebSocketOpCode::Binary);
    assert_eq!(frame.payload, payload);
}

/// Scenario 6: "`BasicAuthorization("orin", "fish").to_header()` equals `"Basic b3JpbjpmaXNo"`."
#[test]
fn basic_auth_header() {
    let authorization = BasicAuthorization::new("orin", "fish").expect("valid user_id");
    assert_eq!(authorization.to_header(), "Basic b3JpbjpmaXNo");
}

/// Scenario 7: "`"max=1000, timeout=5"` and `"timeout=5, max=1000"` both parse to
/// `(connection_timeout=5.0, max_requests=1000)`; `"nyan=13"` parses to defaults."
#[test]
fn keep_alive_header_parse() {
    let a = KeepAliveInfo::from_header_value(Some("max=1000, timeout=5"));
    let b = KeepAliveInfo::from_header_value(Some("timeout=5, max=1000"));
    assert_eq!(a.connection_timeout, 5.0);
    assert_eq!(a.max_requests, 1000);
    assert_eq!(a, b);

    let defaults = KeepAliveInfo::from_header_value(Some("nyan=13"));
    assert_eq!(defaults, KeepAliveInfo::default());
}
