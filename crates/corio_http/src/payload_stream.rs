// Copyright (c) The Corio Project Authors.
// Licensed under the MIT License.

//! [`PayloadStream`]: the single-producer/single-consumer byte queue with backpressure that
//! backs every HTTP message body (spec §3 "PayloadStream", §4.7 "PayloadStream").

use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use corio_mem::Sequence;

use crate::error::Error;

/// Bytes buffered above which the producer should be asked to pause (spec §4.7
/// "Backpressure").
const DEFAULT_HIGH_WATERMARK: usize = 256 * 1024;
/// Bytes buffered below which the producer should be asked to resume.
const DEFAULT_LOW_WATERMARK: usize = 64 * 1024;

struct State {
    /// The chunk deque plus an offset into the head chunk (spec §4.7 "Framing").
    chunks: VecDeque<Sequence>,
    head_offset: usize,
    pending_bytes: usize,
    completed: bool,
    error: Option<Error>,
    waker: Option<Waker>,
    reader_active: bool,
    paused: bool,
    high_watermark: usize,
    low_watermark: usize,
    /// Invoked when the buffered-bytes counter crosses a watermark, so the producing transport
    /// can be paused/resumed (spec §4.7 "Backpressure").
    on_pause_changed: Option<Box<dyn Fn(bool)>>,
}

/// A single-producer/single-consumer byte queue with at most one pending reader (spec §3).
///
/// Cloning shares the same underlying queue: one clone is meant to be held by the producer
/// (e.g. an HTTP read protocol appending chunks as they arrive) and another by the consumer
/// (the body-reading application code).
#[derive(Clone)]
pub struct PayloadStream {
    state: Rc<RefCell<State>>,
}

impl PayloadStream {
    /// Creates an empty, not-yet-completed payload stream.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(State {
                chunks: VecDeque::new(),
                head_offset: 0,
                pending_bytes: 0,
                completed: false,
                error: None,
                waker: None,
                reader_active: false,
                paused: false,
                high_watermark: DEFAULT_HIGH_WATERMARK,
                low_watermark: DEFAULT_LOW_WATERMARK,
            })),
        }
    }

    /// Sets the high/low watermarks driving `on_backpressure_changed`'s callback argument.
    pub fn set_watermarks(&self, high: usize, low: usize) {
        let mut state = self.state.borrow_mut();
        state.high_watermark = high;
        state.low_watermark = low;
    }

    /// Registers a callback invoked with `true` when buffered bytes cross the high watermark and
    /// `false` when they drop back below the low watermark (spec §4.7 "Backpressure": "the
    /// producing transport is asked to pause"/"resume is requested").
    pub fn on_backpressure_changed(&self, callback: impl Fn(bool) + 'static) {
        self.state.borrow_mut().on_pause_changed = Some(Box::new(callback));
    }

    /// Appends a chunk of bytes produced by the reader (spec §4.7 `add_received_chunk`).
    ///
    /// # Panics
    ///
    /// Panics if called after [`PayloadStream::finish`].
    pub fn add_received_chunk(&self, chunk: Sequence) {
        let mut state = self.state.borrow_mut();
        assert!(
            !state.completed,
            "add_received_chunk called after the payload stream was completed"
        );
        if chunk.is_empty() {
            return;
        }

        state.pending_bytes += chunk.len();
        state.chunks.push_back(chunk);

        if !state.paused && state.pending_bytes > state.high_watermark {
            state.paused = true;
            tracing::debug!(
                pending_bytes = state.pending_bytes,
                high_watermark = state.high_watermark,
                "payload stream crossed high watermark; pausing producer"
            );
            if let Some(callback) = state.on_pause_changed.as_ref() {
                callback(true);
            }
        }

        Self::wake(&mut state);
    }

    /// Marks the stream complete, optionally with a terminal error (spec §3 invariant: "after
    /// completion no further chunks are appended"). Idempotent past the first call.
    pub fn finish(&self, error: Option<Error>) {
        let mut state = self.state.borrow_mut();
        if state.completed {
            return;
        }
        state.completed = true;
        state.error = error;
        Self::wake(&mut state);
    }

    fn wake(state: &mut State) {
        if let Some(waker) = state.waker.take() {
            waker.wake();
        }
    }

    fn maybe_resume(state: &mut State) {
        if state.paused && state.pending_bytes <= state.low_watermark {
            state.paused = false;
            tracing::debug!(
                pending_bytes = state.pending_bytes,
                low_watermark = state.low_watermark,
                "payload stream dropped below low watermark; resuming producer"
            );
            if let Some(callback) = state.on_pause_changed.as_ref() {
                callback(false);
            }
        }
    }

    /// Pulls up to `max` bytes out of the chunk deque, starting at `head_offset`, returning them
    /// concatenated as one [`Sequence`]. Never returns more than `max` bytes, and fewer if that's
    /// all that's currently buffered.
    fn drain_up_to(state: &mut State, max: usize) -> Sequence {
        let mut collected = Vec::new();
        let mut remaining = max;

        while remaining > 0 {
            let Some(front) = state.chunks.front() else {
                break;
            };
            let available = front.len() - state.head_offset;
            if available == 0 {
                state.chunks.pop_front();
                state.head_offset = 0;
                continue;
            }

            let take = available.min(remaining);
            collected.push(front.slice(state.head_offset..state.head_offset + take));
            state.head_offset += take;
            remaining -= take;
            state.pending_bytes -= take;

            if state.head_offset >= front.len() {
                state.chunks.pop_front();
                state.head_offset = 0;
            }
        }

        Self::maybe_resume(state);
        Sequence::from_sequences(collected)
    }

    /// Copies every currently-buffered byte (without consuming it) into a flat `Vec<u8>`, used to
    /// scan for a separator that may span multiple chunks.
    fn peek_all(state: &State) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(state.pending_bytes);
        for (index, chunk) in state.chunks.iter().enumerate() {
            let start = if index == 0 { state.head_offset } else { 0 };
            let bytes = chunk.slice(start..).into_bytes();
            buffer.extend_from_slice(&bytes);
        }
        buffer
    }

    fn begin_read(&self) {
        let mut state = self.state.borrow_mut();
        assert!(
            !state.reader_active,
            "PayloadStream: a second concurrent read was attempted while one was already pending \
             (spec: at most one reader may be suspended)"
        );
        state.reader_active = true;
    }

    fn end_read(&self) {
        self.state.borrow_mut().reader_active = false;
    }

    /// Reads exactly `len` bytes, waiting for more chunks (or the terminal error/EOF) as needed.
    pub fn read_exactly(&self, len: usize) -> ReadFuture<'_> {
        ReadFuture::new(self, ReadRequest::Exactly(len))
    }

    /// Reads bytes up to and including the first occurrence of `separator`, which may span
    /// multiple buffered chunks.
    pub fn read_until(&self, separator: Vec<u8>) -> ReadFuture<'_> {
        ReadFuture::new(self, ReadRequest::Until(separator))
    }

    /// Reads every remaining byte until the stream completes.
    pub fn read_to_end(&self) -> ReadFuture<'_> {
        ReadFuture::new(self, ReadRequest::ToEnd)
    }

    /// Reads the next available chunk, or `None` once the stream completes with no more
    /// buffered bytes (spec §4.7: "Consumer asynchronously iterates chunks").
    pub fn read_chunk(&self) -> ReadFuture<'_> {
        ReadFuture::new(self, ReadRequest::NextChunk)
    }

    fn poll_read(&self, cx: &mut Context<'_>, request: &ReadRequest) -> Poll<Result<ReadOutcome, Error>> {
        let mut state = self.state.borrow_mut();

        match request {
            ReadRequest::Exactly(len) => {
                if state.pending_bytes >= *len {
                    return Poll::Ready(Ok(ReadOutcome::Chunk(Self::drain_up_to(&mut state, *len))));
                }
            }
            ReadRequest::Until(separator) => {
                let buffered = Self::peek_all(&state);
                if let Some(position) = find_subslice(&buffered, separator) {
                    let total = position + separator.len();
                    return Poll::Ready(Ok(ReadOutcome::Chunk(Self::drain_up_to(&mut state, total))));
                }
            }
            ReadRequest::ToEnd => {
                if state.completed && state.error.is_none() {
                    let remaining = state.pending_bytes;
                    return Poll::Ready(Ok(ReadOutcome::Chunk(Self::drain_up_to(&mut state, remaining))));
                }
            }
            ReadRequest::NextChunk => {
                if state.pending_bytes > 0 {
                    // Spec invariant 5 only promises the concatenation in order, not chunk
                    // boundaries; returning the whole head chunk is the natural unit here.
                    let len = state.chunks.front().map_or(0, |c| c.len() - state.head_offset);
                    return Poll::Ready(Ok(ReadOutcome::Chunk(Self::drain_up_to(&mut state, len))));
                }
                if state.completed && state.error.is_none() {
                    return Poll::Ready(Ok(ReadOutcome::Eof));
                }
            }
        }

        // Per spec §3: "readers observe the exception (if any) only after draining buffered
        // bytes" — only surface it once nothing else can be returned from what's requested.
        if state.completed {
            if let Some(error) = state.error.take() {
                return Poll::Ready(Err(error));
            }
            if !matches!(request, ReadRequest::NextChunk) {
                // EOF with insufficient bytes for an exact/until read: return what's left.
                let remaining = state.pending_bytes;
                return Poll::Ready(Ok(ReadOutcome::Chunk(Self::drain_up_to(&mut state, remaining))));
            }
        }

        state.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl Default for PayloadStream {
    fn default() -> Self {
        Self::new()
    }
}

enum ReadRequest {
    Exactly(usize),
    Until(Vec<u8>),
    ToEnd,
    NextChunk,
}

enum ReadOutcome {
    Chunk(Sequence),
    Eof,
}

/// The future type returned by [`PayloadStream`]'s read methods. Dropping it before completion
/// releases the "one pending reader" slot without losing any buffered bytes (spec §4.7
/// "Cancellation of a reader releases the waiter without losing buffered bytes").
pub struct ReadFuture<'a> {
    stream: &'a PayloadStream,
    request: ReadRequest,
    started: bool,
    done: bool,
}

impl<'a> ReadFuture<'a> {
    fn new(stream: &'a PayloadStream, request: ReadRequest) -> Self {
        Self {
            stream,
            request,
            started: false,
            done: false,
        }
    }
}

impl Future for ReadFuture<'_> {
    type Output = Result<Sequence, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if !this.started {
            this.stream.begin_read();
            this.started = true;
        }

        match this.stream.poll_read(cx, &this.request) {
            Poll::Ready(result) => {
                this.done = true;
                this.stream.end_read();
                Poll::Ready(result.map(|outcome| match outcome {
                    ReadOutcome::Chunk(sequence) => sequence,
                    ReadOutcome::Eof => Sequence::from_bytes(
                        bytes::Bytes::new(),
                        &corio_mem::DefaultMemoryPool::new(std::num::NonZero::new(4096).unwrap()),
                    ),
                }))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for ReadFuture<'_> {
    fn drop(&mut self) {
        if self.started && !self.done {
            self.stream.end_read();
        }
    }
}

/// Finds the first occurrence of `needle` inside `haystack`, returning its starting offset.
fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}
