// Copyright (c) The Corio Project Authors.
// Licensed under the MIT License.

//! WebSocket frame reading and writing (spec §4.7 "WebSocket frame"), grounded on the frame
//! model in `web_common/web_socket_frame.py`: a one-byte `head_0` packing FIN + opcode, and
//! `apply_web_socket_mask`'s four-way XOR masking.

use crate::error::Error;
use crate::payload_stream::PayloadStream;

/// A WebSocket frame opcode (RFC 6455 §5.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    /// Continuation of a fragmented message.
    Continuation,
    /// A complete (or first-fragment) UTF-8 text message.
    Text,
    /// A complete (or first-fragment) binary message.
    Binary,
    /// Connection close.
    Close,
    /// Ping.
    Ping,
    /// Pong.
    Pong,
}

impl OpCode {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Continuation),
            1 => Some(Self::Text),
            2 => Some(Self::Binary),
            8 => Some(Self::Close),
            9 => Some(Self::Ping),
            10 => Some(Self::Pong),
            _ => None,
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            Self::Continuation => 0,
            Self::Text => 1,
            Self::Binary => 2,
            Self::Close => 8,
            Self::Ping => 9,
            Self::Pong => 10,
        }
    }

    /// Whether this is a control opcode (close/ping/pong), which per RFC 6455 §5.4 may not be
    /// fragmented and must carry at most 125 bytes of payload.
    #[must_use]
    pub fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }
}

/// Which side of the connection a frame is being read on, since masking is mandatory in one
/// direction and forbidden in the other (RFC 6455 §5.1: "a client MUST mask... a server MUST
/// NOT mask").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Reading frames sent by a client: the mask bit must be set.
    Server,
    /// Reading frames sent by a server: the mask bit must be clear.
    Client,
}

/// A single WebSocket frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Whether this is the final fragment of a message.
    pub final_fragment: bool,
    /// The frame's opcode.
    pub opcode: OpCode,
    /// The (already unmasked, if it arrived masked) payload.
    pub payload: Vec<u8>,
}

const MAX_CONTROL_FRAME_PAYLOAD: usize = 125;

impl Frame {
    /// Creates a frame, validating it against the invariants `check()` enforces in the reference
    /// implementation: reserved bits aren't representable here (there are none to set), but
    /// control frames must be final and within 125 bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Payload`] if `opcode` is a control opcode and either `final_fragment` is
    /// `false` or `payload` exceeds 125 bytes.
    pub fn new(final_fragment: bool, opcode: OpCode, payload: Vec<u8>) -> Result<Self, Error> {
        let frame = Self {
            final_fragment,
            opcode,
            payload,
        };
        frame.check()?;
        Ok(frame)
    }

    fn check(&self) -> Result<(), Error> {
        if self.opcode.is_control() {
            if self.payload.len() > MAX_CONTROL_FRAME_PAYLOAD {
                return Err(Error::Payload("control frame too long".to_string()));
            }
            if !self.final_fragment {
                return Err(Error::Payload("fragmented control frame".to_string()));
            }
        }
        Ok(())
    }

    /// Encodes this frame to its wire representation. When `mask` is `Some`, the payload is
    /// masked with the given key and the mask bit is set (spec §4.7: "a client always masks its
    /// outgoing frames").
    #[must_use]
    pub fn encode(&self, mask: Option<[u8; 4]>) -> Vec<u8> {
        let mut head_0 = self.opcode.to_u8();
        if self.final_fragment {
            head_0 |= 0b1000_0000;
        }

        let mut out = Vec::with_capacity(self.payload.len() + 14);
        out.push(head_0);

        let mask_bit = if mask.is_some() { 0b1000_0000 } else { 0 };
        let length = self.payload.len();
        if length <= 125 {
            #[allow(clippy::cast_possible_truncation)]
            out.push(mask_bit | length as u8);
        } else if let Ok(length) = u16::try_from(length) {
            out.push(mask_bit | 126);
            out.extend_from_slice(&length.to_be_bytes());
        } else {
            out.push(mask_bit | 127);
            out.extend_from_slice(&(length as u64).to_be_bytes());
        }

        if let Some(mask) = mask {
            out.extend_from_slice(&mask);
            let mut payload = self.payload.clone();
            apply_mask(mask, &mut payload);
            out.extend_from_slice(&payload);
        } else {
            out.extend_from_slice(&self.payload);
        }

        out
    }

    /// Reads a single frame from `stream`, validating the mask bit against `role` and the
    /// control-frame invariants.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Payload`] if the reserved bits are set, the opcode is unrecognized, the
    /// mask bit doesn't match what `role` expects, or the framing otherwise violates RFC 6455.
    pub async fn read(stream: &PayloadStream, role: Role) -> Result<Self, Error> {
        let head = stream.read_exactly(2).await?.into_bytes();
        let head_0 = head[0];
        let head_1 = head[1];

        if head_0 & 0b0111_0000 != 0 {
            tracing::warn!(head_0 = format!("{head_0:#010b}"), "WebSocket frame with non-zero reserved bits");
            return Err(Error::Payload("reserved bits must be 0".to_string()));
        }

        let opcode = OpCode::from_u8(head_0 & 0b0000_1111)
            .ok_or_else(|| Error::Payload(format!("invalid opcode: {}", head_0 & 0b0000_1111)))?;
        let final_fragment = head_0 & 0b1000_0000 != 0;

        let masked = head_1 & 0b1000_0000 != 0;
        let expected_masked = role == Role::Server;
        if masked != expected_masked {
            tracing::warn!(?role, masked, "WebSocket frame mask bit does not match the reader's role");
            return Err(Error::Payload(format!(
                "unexpected mask bit: expected masked = {expected_masked}, got {masked}"
            )));
        }

        let length = match head_1 & 0b0111_1111 {
            126 => {
                let bytes = stream.read_exactly(2).await?.into_bytes();
                u64::from(u16::from_be_bytes([bytes[0], bytes[1]]))
            }
            127 => {
                let bytes = stream.read_exactly(8).await?.into_bytes();
                u64::from_be_bytes(bytes.as_ref().try_into().expect("exactly 8 bytes"))
            }
            small => u64::from(small),
        };

        let length = usize::try_from(length)
            .map_err(|_| Error::Payload("frame payload length overflows usize".to_string()))?;

        let mask = if masked {
            let bytes = stream.read_exactly(4).await?.into_bytes();
            Some([bytes[0], bytes[1], bytes[2], bytes[3]])
        } else {
            None
        };

        let mut payload = stream.read_exactly(length).await?.into_bytes().to_vec();
        if let Some(mask) = mask {
            apply_mask(mask, &mut payload);
        }

        let frame = Self {
            final_fragment,
            opcode,
            payload,
        };
        frame.check()?;
        Ok(frame)
    }
}

/// Applies (or removes, XOR being its own inverse) a WebSocket mask to `data` in place, cycling
/// through the 4-byte key (spec §4.7, reference: `apply_web_socket_mask`).
fn apply_mask(mask: [u8; 4], data: &mut [u8]) {
    for (index, byte) in data.iter_mut().enumerate() {
        *byte ^= mask[index % 4];
    }
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::num::NonZero;

    use corio_mem::{DefaultMemoryPool, ProvideMemory};

    use super::*;

    fn pool() -> DefaultMemoryPool {
        DefaultMemoryPool::new(NonZero::new(4096).unwrap())
    }

    fn feed(stream: &PayloadStream, bytes: &[u8]) {
        stream.add_received_chunk(corio_mem::Sequence::from_bytes(bytes.to_vec(), &pool()));
    }

    #[test]
    fn mask_is_its_own_inverse() {
        let mask = [0x12, 0x34, 0x56, 0x78];
        let mut data = b"hello world".to_vec();
        let original = data.clone();
        apply_mask(mask, &mut data);
        assert_ne!(data, original);
        apply_mask(mask, &mut data);
        assert_eq!(data, original);
    }

    #[test]
    fn encode_then_read_masked_text_frame_round_trips() {
        let frame = Frame::new(true, OpCode::Text, b"hello".to_vec()).unwrap();
        let encoded = frame.encode(Some([1, 2, 3, 4]));

        let stream = PayloadStream::new();
        feed(&stream, &encoded);
        stream.finish(None);

        let waker = noop_waker();
        let mut cx = std::task::Context::from_waker(&waker);
        let mut fut = std::pin::pin!(Frame::read(&stream, Role::Server));
        match fut.as_mut().poll(&mut cx) {
            std::task::Poll::Ready(Ok(read)) => assert_eq!(read, frame),
            _ => panic!("expected a ready, successfully-decoded frame"),
        }
    }

    #[test]
    fn long_payload_uses_extended_length() {
        let payload = vec![0x42; 70_000];
        let frame = Frame::new(true, OpCode::Binary, payload.clone()).unwrap();
        let encoded = frame.encode(None);
        // 1 (head) + 1 (len=127 marker) + 8 (extended length) + payload.
        assert_eq!(encoded.len(), 1 + 1 + 8 + payload.len());
        assert_eq!(encoded[1], 127);
    }

    #[test]
    fn oversized_control_frame_is_rejected() {
        let result = Frame::new(true, OpCode::Ping, vec![0u8; 200]);
        assert!(matches!(result, Err(Error::Payload(_))));
    }

    #[test]
    fn fragmented_control_frame_is_rejected() {
        let result = Frame::new(false, OpCode::Close, vec![]);
        assert!(matches!(result, Err(Error::Payload(_))));
    }

    #[test]
    fn mask_bit_mismatch_is_rejected() {
        let frame = Frame::new(true, OpCode::Text, b"hi".to_vec()).unwrap();
        // A client reading this stream expects server frames to be *unmasked*.
        let encoded = frame.encode(Some([9, 9, 9, 9]));

        let stream = PayloadStream::new();
        feed(&stream, &encoded);
        stream.finish(None);

        let waker = noop_waker();
        let mut cx = std::task::Context::from_waker(&waker);
        let mut fut = std::pin::pin!(Frame::read(&stream, Role::Client));
        match fut.as_mut().poll(&mut cx) {
            std::task::Poll::Ready(Err(Error::Payload(_))) => {}
            _ => panic!("expected a mask-mismatch error"),
        }
    }

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
}
