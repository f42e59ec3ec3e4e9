// Copyright (c) The Corio Project Authors.
// Licensed under the MIT License.

//! HTTP/1.1 and WebSocket client for the Corio SDK (spec §4.6 "HTTP client protocol factory";
//! SPEC_FULL.md §11), grounded on `scarletio/http_client`'s `HTTPClient`/`ConnectorTCP`/
//! `WebSocketContextManager`.
//!
//! This crate binds [`corio_http`]'s transport-agnostic wire framing to a real
//! [`corio_rt::EventLoop`]: [`Connector`] resolves DNS and dials TCP (wrapping the connection in
//! TLS when asked), [`HttpClient`] layers request/response semantics and connection reuse on top,
//! and [`WebSocketClient`] performs the upgrade handshake and exposes the resulting frame stream.

mod client;
mod connector;
mod error;
mod helpers;
mod websocket;

pub use client::{HttpClient, RequestConfig, Response, REQUEST_TIMEOUT_DEFAULT};
pub use connector::{default_tls_config, Connection, Connector, TlsPolicy};
pub use error::{Error, Result};
pub use helpers::{is_ipv4_literal, is_ipv6_literal};
pub use websocket::WebSocketClient;
