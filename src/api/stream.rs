use super::logging::emit_sse_parse_error;
use super::ByteStream;
use crate::error::TurnError;
use anyhow::Result;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use std::collections::VecDeque;
use std::marker::PhantomData;
use tokio_util::sync::CancellationToken;

const DATA_PREFIX: &str = "data: ";
const DONE_SENTINEL: &str = "[DONE]";

/// Incremental SSE framer.
///
/// Decodes bytes to UTF-8 across chunk boundaries and splits the text into raw
/// `data: ` record payloads. Records are only released once their event is
/// terminated by a blank line (or once another `data: ` prefix follows them),
/// so a record split across reads is never parsed half-way.
#[derive(Default)]
pub struct StreamParser {
    pending_bytes: Vec<u8>,
    buffer: String,
    finished: bool,
}

impl StreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the `[DONE]` sentinel has been seen.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn process(&mut self, chunk: &[u8]) -> Vec<String> {
        if self.finished {
            return Vec::new();
        }

        self.decode(chunk);
        let mut records = Vec::new();
        let mut start = 0;

        while let Some(end) = self.buffer[start..].find("\n\n") {
            let event_end = start + end + 2;
            let event_text = &self.buffer[start..start + end];
            if collect_records(event_text, &mut records) {
                self.finish_at_sentinel();
                return records;
            }
            start = event_end;
        }

        if start > 0 {
            self.buffer.drain(..start);
        }

        // The unterminated tail can still hold the sentinel; records that precede it
        // there are complete because another prefix follows them.
        if tail_has_sentinel(&self.buffer) {
            collect_records(&self.buffer, &mut records);
            self.finish_at_sentinel();
        }

        records
    }

    /// Flushes whatever is left once the byte stream ends without a sentinel.
    pub fn finish(&mut self) -> Vec<String> {
        if self.finished {
            return Vec::new();
        }

        if !self.pending_bytes.is_empty() {
            let remainder = std::mem::take(&mut self.pending_bytes);
            self.buffer.push_str(&String::from_utf8_lossy(&remainder));
        }

        let mut records = Vec::new();
        let tail = std::mem::take(&mut self.buffer);
        collect_records(&tail, &mut records);
        self.finished = true;
        records
    }

    fn finish_at_sentinel(&mut self) {
        self.finished = true;
        self.buffer.clear();
        self.pending_bytes.clear();
    }

    fn decode(&mut self, chunk: &[u8]) {
        self.pending_bytes.extend_from_slice(chunk);
        loop {
            match std::str::from_utf8(&self.pending_bytes) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    self.pending_bytes.clear();
                    break;
                }
                Err(error) => {
                    let valid = error.valid_up_to();
                    self.buffer
                        .push_str(&String::from_utf8_lossy(&self.pending_bytes[..valid]));
                    match error.error_len() {
                        // Incomplete code point at the end: keep it for the next read.
                        None => {
                            self.pending_bytes.drain(..valid);
                            break;
                        }
                        Some(invalid_len) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            self.pending_bytes.drain(..valid + invalid_len);
                        }
                    }
                }
            }
        }

        if self.buffer.contains('\r') {
            self.buffer = self.buffer.replace("\r\n", "\n");
        }
    }
}

/// Pushes the payload of every `data: ` line of `event_text`; returns true
/// when the sentinel was reached, in which case nothing after it is collected.
fn collect_records(event_text: &str, records: &mut Vec<String>) -> bool {
    // `event:`, `id:` and comment lines carry nothing we need.
    for payload in data_payloads(event_text) {
        if payload.is_empty() {
            continue;
        }
        if payload == DONE_SENTINEL {
            return true;
        }
        records.push(payload.to_string());
    }
    false
}

fn tail_has_sentinel(tail: &str) -> bool {
    data_payloads(tail).any(|payload| payload == DONE_SENTINEL)
}

/// The prefix only counts at the start of a line; payload text may itself
/// contain `data: `.
fn data_payloads(event_text: &str) -> impl Iterator<Item = &str> {
    event_text
        .lines()
        .filter_map(|line| line.strip_prefix(DATA_PREFIX))
        .map(str::trim)
}

/// Pull-based reader yielding typed payloads from an SSE byte stream.
///
/// Nothing is read from the network until the caller asks for the next
/// payload, so work done between calls is always finished before the
/// following chunk is consumed.
pub struct SseReader<T> {
    stream: ByteStream,
    parser: StreamParser,
    pending: VecDeque<String>,
    exhausted: bool,
    cancel: Option<CancellationToken>,
    _payload: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> SseReader<T> {
    pub fn new(stream: ByteStream) -> Self {
        Self {
            stream,
            parser: StreamParser::new(),
            pending: VecDeque::new(),
            exhausted: false,
            cancel: None,
            _payload: PhantomData,
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub async fn next_payload(&mut self) -> Result<Option<T>> {
        loop {
            if self.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
                self.exhausted = true;
                return Err(TurnError::Cancelled.into());
            }

            if let Some(record) = self.pending.pop_front() {
                return match serde_json::from_str::<T>(&record) {
                    Ok(payload) => Ok(Some(payload)),
                    Err(source) => {
                        emit_sse_parse_error(&record, &source);
                        self.exhausted = true;
                        self.pending.clear();
                        Err(TurnError::MalformedRecord { record, source }.into())
                    }
                };
            }

            if self.exhausted || self.parser.is_finished() {
                return Ok(None);
            }

            let next_chunk = match &self.cancel {
                Some(token) => {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => {
                            self.exhausted = true;
                            return Err(TurnError::Cancelled.into());
                        }
                        chunk = self.stream.next() => chunk,
                    }
                }
                None => self.stream.next().await,
            };

            match next_chunk {
                Some(chunk) => {
                    let chunk = chunk?;
                    self.pending.extend(self.parser.process(&chunk));
                }
                None => {
                    self.exhausted = true;
                    self.pending.extend(self.parser.finish());
                }
            }
        }
    }
}
