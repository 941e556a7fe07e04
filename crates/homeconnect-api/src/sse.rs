//! Server-sent event stream parsing.
//!
//! Decodes a live HTTP response body into discrete [`SseRecord`]s:
//!
//! - [`LineDecoder`] splits raw bytes into lines (LF, CRLF or a lone CR),
//!   keeping partial lines buffered across network chunks.
//! - [`SseParser`] accumulates `field: value` lines into a record,
//!   emitting it at each blank line.
//! - [`event_stream`] glues both onto a `reqwest::Response` and yields
//!   records followed by exactly one terminal [`EventStreamError`].
//!
//! A stream is not restartable; reconnecting means a new request and a
//! new parser.

use std::pin::Pin;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use futures_util::{Stream, StreamExt};
use indexmap::IndexMap;

use crate::error::EventStreamError;

/// Records from a live event stream. The final item is always an `Err`.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<SseRecord, EventStreamError>> + Send>>;

// ── SseRecord ────────────────────────────────────────────────────────

/// One server-pushed event: field name → value, in arrival order.
/// Repeated fields are joined with `\n`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseRecord {
    fields: IndexMap<String, String>,
}

impl SseRecord {
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    /// The `event` field (e.g. `STATUS`, `KEEP-ALIVE`).
    pub fn event(&self) -> Option<&str> {
        self.get("event")
    }

    pub fn data(&self) -> Option<&str> {
        self.get("data")
    }

    /// The `id` field. The appliance events carry the appliance id here.
    pub fn id(&self) -> Option<&str> {
        self.get("id")
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

// ── SseParser ────────────────────────────────────────────────────────

/// Line-at-a-time accumulator.
#[derive(Debug, Default)]
pub struct SseParser {
    current: IndexMap<String, String>,
}

impl SseParser {
    /// Feed one line (without its terminator). Returns a completed
    /// record when `line` is the blank line ending a non-empty one.
    pub fn push_line(&mut self, line: &str) -> Option<SseRecord> {
        if line.is_empty() {
            if self.current.is_empty() {
                return None;
            }
            return Some(SseRecord {
                fields: std::mem::take(&mut self.current),
            });
        }

        if let Some(comment) = line.strip_prefix(':') {
            tracing::trace!(comment, "event stream comment");
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match self.current.get_mut(field) {
            Some(existing) => {
                existing.push('\n');
                existing.push_str(value);
            }
            None => {
                self.current.insert(field.to_owned(), value.to_owned());
            }
        }
        None
    }
}

// ── LineDecoder ──────────────────────────────────────────────────────

/// Longest unterminated line kept while waiting for more bytes.
pub const MAX_LINE_LEN: usize = 1 << 20;

/// Splits a byte stream into text lines.
///
/// Lines are cut at raw terminator bytes, so a multi-byte UTF-8 sequence
/// split across two chunks is reassembled before decoding. A CR ends a
/// line at once; an LF right after it, even in the next chunk, is eaten.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: BytesMut,
    after_cr: bool,
}

impl LineDecoder {
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Next complete line with its terminator removed, `None` until one
    /// arrives. Fails once an unterminated line exceeds [`MAX_LINE_LEN`].
    pub fn next_line(&mut self) -> Result<Option<String>, EventStreamError> {
        if self.after_cr && !self.buffer.is_empty() {
            if self.buffer[0] == b'\n' {
                self.buffer.advance(1);
            }
            self.after_cr = false;
        }

        let Some(end) = self.buffer.iter().position(|&b| b == b'\n' || b == b'\r') else {
            if self.buffer.len() > MAX_LINE_LEN {
                self.buffer.clear();
                return Err(EventStreamError::Malformed(format!(
                    "line longer than {MAX_LINE_LEN} bytes"
                )));
            }
            return Ok(None);
        };

        let line = self.buffer.split_to(end);
        self.after_cr = self.buffer[0] == b'\r';
        self.buffer.advance(1);
        Ok(Some(String::from_utf8_lossy(&line).into_owned()))
    }
}

/// Parse a complete text buffer into records. An unterminated trailing
/// record is discarded, as it would be on a dropped connection.
pub fn parse_text(text: &str) -> Vec<SseRecord> {
    let mut decoder = LineDecoder::default();
    let mut parser = SseParser::default();
    decoder.push(text.as_bytes());

    let mut records = Vec::new();
    while let Ok(Some(line)) = decoder.next_line() {
        if let Some(record) = parser.push_line(&line) {
            records.push(record);
        }
    }
    records
}

// ── Live stream ──────────────────────────────────────────────────────

/// Turn a streaming response body into records.
///
/// `read_timeout` bounds the silence between chunks; the server sends a
/// keep-alive well inside the default.
pub fn event_stream(response: reqwest::Response, read_timeout: Duration) -> EventStream {
    Box::pin(async_stream::stream! {
        let body = response.bytes_stream();
        futures_util::pin_mut!(body);

        let mut decoder = LineDecoder::default();
        let mut parser = SseParser::default();

        'read: loop {
            let Ok(next) = tokio::time::timeout(read_timeout, body.next()).await else {
                yield Err(EventStreamError::Timeout(read_timeout));
                break;
            };

            match next {
                Some(Ok(chunk)) => {
                    decoder.push(&chunk);
                    loop {
                        match decoder.next_line() {
                            Ok(Some(line)) => {
                                if let Some(record) = parser.push_line(&line) {
                                    yield Ok(record);
                                }
                            }
                            Ok(None) => break,
                            Err(e) => {
                                yield Err(e);
                                break 'read;
                            }
                        }
                    }
                }
                Some(Err(e)) => {
                    tracing::debug!(error = %e, "event stream body failed");
                    yield Err(EventStreamError::Failed(e));
                    break;
                }
                None => {
                    tracing::debug!("event stream body ended");
                    yield Err(EventStreamError::Ended);
                    break;
                }
            }
        }
    })
}

// ── Tests ────────────────────────────────────────────────────────────
