//! Incremental decoding of concatenated JSON objects.
//!
//! The generate endpoint streams one JSON object per generated token, but the
//! transport makes no promise about where chunk boundaries fall: an object may
//! be split across chunks, and one chunk may carry several objects with or
//! without newlines between them. [`StreamDecoder`] tracks brace depth outside
//! string literals and emits each object as soon as its closing brace arrives.

use crate::Error;
use futures::stream::{self, Stream, StreamExt};
use serde::de::DeserializeOwned;
use std::collections::VecDeque;
use std::fmt::Display;
use std::marker::PhantomData;
use std::pin::Pin;
use tracing::debug;

/// Reassembles complete JSON objects from arbitrarily split text.
///
/// Only newly appended text is scanned, so feeding a long response one byte
/// at a time stays linear. A span that closes but fails to parse is dropped
/// and scanning continues with the next object.
#[derive(Debug)]
pub struct StreamDecoder<T> {
    buffer: String,
    /// Trailing bytes of an incomplete UTF-8 sequence from the last chunk.
    pending_bytes: Vec<u8>,
    depth: usize,
    in_string: bool,
    escaped: bool,
    /// Offset of the opening brace of the object being scanned.
    start: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> StreamDecoder<T> {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            pending_bytes: Vec::new(),
            depth: 0,
            in_string: false,
            escaped: false,
            start: 0,
            _marker: PhantomData,
        }
    }

    /// Append a text fragment and return every object it completed.
    pub fn push(&mut self, fragment: &str) -> Vec<T> {
        let resume = self.buffer.len();
        self.buffer.push_str(fragment);

        let mut decoded = Vec::new();
        let mut consumed = 0;

        for (offset, ch) in self.buffer[resume..].char_indices() {
            let pos = resume + offset;

            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if ch == '\\' {
                    self.escaped = true;
                } else if ch == '"' {
                    self.in_string = false;
                }
                continue;
            }

            match ch {
                '"' => self.in_string = true,
                '{' => {
                    if self.depth == 0 {
                        self.start = pos;
                    }
                    self.depth += 1;
                }
                // A closing brace with nothing open is stray text.
                '}' if self.depth > 0 => {
                    self.depth -= 1;
                    if self.depth == 0 {
                        let span = &self.buffer[self.start..=pos];
                        match serde_json::from_str(span) {
                            Ok(message) => decoded.push(message),
                            Err(e) => {
                                debug!(error = %e, len = span.len(), "dropping malformed stream object")
                            }
                        }
                        consumed = pos + 1;
                    }
                }
                _ => {}
            }
        }

        if consumed > 0 {
            self.buffer.drain(..consumed);
            self.start = self.start.saturating_sub(consumed);
        }

        decoded
    }

    /// Append raw transport bytes.
    ///
    /// A multi-byte character split across two chunks is held back until the
    /// rest of it arrives. Bytes that can never form valid UTF-8 are replaced.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> Vec<T> {
        self.pending_bytes.extend_from_slice(bytes);

        let valid = match std::str::from_utf8(&self.pending_bytes) {
            Ok(_) => self.pending_bytes.len(),
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(_) => self.pending_bytes.len(),
        };

        let tail = self.pending_bytes.split_off(valid);
        let text = String::from_utf8_lossy(&self.pending_bytes).into_owned();
        self.pending_bytes = tail;

        self.push(&text)
    }

    /// Signal end of input and try to parse whatever is left over.
    ///
    /// Leaves the decoder empty.
    pub fn finish(&mut self) -> Option<T> {
        if !self.pending_bytes.is_empty() {
            let tail = std::mem::take(&mut self.pending_bytes);
            self.buffer.push_str(&String::from_utf8_lossy(&tail));
        }

        let rest = std::mem::take(&mut self.buffer);
        self.depth = 0;
        self.in_string = false;
        self.escaped = false;
        self.start = 0;

        let rest = rest.trim();
        if rest.is_empty() {
            return None;
        }

        match serde_json::from_str(rest) {
            Ok(message) => Some(message),
            Err(e) => {
                debug!(error = %e, len = rest.len(), "discarding incomplete stream tail");
                None
            }
        }
    }

    /// Number of buffered characters not yet consumed by a complete object.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len() + self.pending_bytes.len()
    }
}

impl<T: DeserializeOwned> Default for StreamDecoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode a byte stream of concatenated JSON objects into a stream of values.
///
/// The returned stream ends when the source ends. A transport error is
/// surfaced once as [`Error::Network`] and ends the stream.
pub fn decode_stream<T, S, B, E>(source: S) -> impl Stream<Item = Result<T, Error>>
where
    T: DeserializeOwned,
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    struct State<S, T> {
        source: Pin<Box<S>>,
        decoder: StreamDecoder<T>,
        ready: VecDeque<T>,
        finished: bool,
    }

    let state = State {
        source: Box::pin(source),
        decoder: StreamDecoder::new(),
        ready: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(message) = state.ready.pop_front() {
                return Some((Ok(message), state));
            }
            if state.finished {
                return None;
            }

            match state.source.next().await {
                Some(Ok(chunk)) => {
                    let decoded = state.decoder.push_bytes(chunk.as_ref());
                    state.ready.extend(decoded);
                }
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((Err(Error::Network(e.to_string())), state));
                }
                None => {
                    state.finished = true;
                    let tail = state.decoder.finish();
                    state.ready.extend(tail);
                }
            }
        }
    })
}
