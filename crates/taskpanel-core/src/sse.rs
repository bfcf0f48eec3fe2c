//! Incremental Server-Sent-Events framing.
//!
//! Bytes are decoded into a text buffer with a stateful UTF-8 decoder, then
//! split into records on blank lines (`"\n\n"`). Each record is reduced to an
//! event type and a payload; `SseFrame::into_run_event` keeps only the
//! `status` and `log` types.

use crate::stream::{EventKind, RunEvent};

const DEFAULT_EVENT_TYPE: &str = "message";
const RECORD_DELIMITER: &str = "\n\n";

/// One parsed SSE record before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// Resolved `event:` value, `"message"` when the record has none.
    pub event: String,
    /// `data:` lines joined with `\n`.
    pub data: String,
}

impl SseFrame {
    /// Converts the frame into a deliverable event, or `None` for any event
    /// type other than `status` and `log`.
    pub fn into_run_event(self) -> Option<RunEvent> {
        EventKind::from_event_type(&self.event).map(|kind| RunEvent {
            kind,
            data: self.data,
        })
    }
}

/// UTF-8 decoder that carries an incomplete trailing sequence over to the
/// next chunk. Invalid sequences become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8ChunkDecoder {
    pending: Vec<u8>,
}

impl Utf8ChunkDecoder {
    /// Decodes `chunk`, prefixed by any bytes held back from the previous call.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let mut bytes = std::mem::take(&mut self.pending);
        bytes.extend_from_slice(chunk);

        let mut out = String::with_capacity(bytes.len());
        let mut rest: &[u8] = &bytes;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match err.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            // Incomplete sequence at the end: wait for more bytes.
                            self.pending = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Number of bytes held back waiting for the rest of a character.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Frames a chunked byte stream into SSE records.
#[derive(Debug, Default)]
pub struct SseDecoder {
    utf8: Utf8ChunkDecoder,
    buf: String,
    // Byte offset in `buf` before which no delimiter can start.
    scan_from: usize,
}

impl SseDecoder {
    /// Appends a chunk and returns every record completed by it, in order.
    ///
    /// Blank records are skipped. Data after the last delimiter stays
    /// buffered for the next call.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        let text = self.utf8.decode(chunk);
        self.buf.push_str(&text);

        let mut frames = Vec::new();
        while let Some(offset) = self.buf[self.scan_from..].find(RECORD_DELIMITER) {
            let idx = self.scan_from + offset;
            let raw: String = self.buf.drain(..idx + RECORD_DELIMITER.len()).collect();
            self.scan_from = 0;
            let record = &raw[..idx];
            if record.trim().is_empty() {
                continue;
            }
            frames.push(parse_record(record));
        }

        // A delimiter may straddle the next chunk boundary only if the buffer
        // currently ends with its first newline.
        self.scan_from = if self.buf.ends_with('\n') {
            self.buf.len() - 1
        } else {
            self.buf.len()
        };
        frames
    }

    /// Ends the stream, discarding any unterminated record.
    ///
    /// Returns the number of bytes that were dropped.
    pub fn finish(&mut self) -> usize {
        let dropped = self.buf.len() + self.utf8.pending_len();
        *self = Self::default();
        dropped
    }

    /// Returns the unterminated text currently buffered.
    pub fn buffered(&self) -> &str {
        &self.buf
    }
}

/// Parses one raw record (without its trailing delimiter).
pub fn parse_record(record: &str) -> SseFrame {
    let mut event = DEFAULT_EVENT_TYPE.to_string();
    let mut data_lines: Vec<&str> = Vec::new();
    for line in record.split('\n') {
        if let Some(rest) = line.strip_prefix("event:") {
            event = rest.trim().to_string();
        } else if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(strip_field_separator(rest).trim_end());
        }
    }
    SseFrame {
        event,
        data: data_lines.join("\n"),
    }
}

fn strip_field_separator(value: &str) -> &str {
    let mut chars = value.chars();
    match chars.next() {
        Some(c) if c.is_whitespace() => chars.as_str(),
        _ => value,
    }
}
