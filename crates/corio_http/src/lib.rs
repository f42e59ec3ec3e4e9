// Copyright (c) The Corio Project Authors.
// Licensed under the MIT License.

//! HTTP/1.1 and WebSocket wire framing for the Corio SDK (spec §4.7).
//!
//! This crate is transport-agnostic: it reads from and writes to [`PayloadStream`], a plain
//! byte queue. Binding that queue to an actual socket is [`corio_client`]'s job.

mod basic_auth;
mod compress;
mod decompress;
mod error;
mod keep_alive;
mod payload_stream;
mod read;
mod websocket;
mod write;

pub use basic_auth::{BasicAuthorization, Encoding as BasicAuthEncoding};
pub use compress::Compressor;
pub use decompress::Decompressor;
pub use error::{Error, Result};
pub use keep_alive::KeepAliveInfo;
pub use payload_stream::{PayloadStream, ReadFuture};
pub use read::{
    pump_body, read_http_request, read_http_response, select_body_mode, BodyMode, RequestHead,
    ResponseHead,
};
pub use websocket::{Frame as WebSocketFrame, OpCode as WebSocketOpCode, Role as WebSocketRole};
pub use write::{
    encode_chunk, encode_final_chunk, write_headers, write_http_message, write_request_line,
    write_status_line, WriteBodyMode,
};
