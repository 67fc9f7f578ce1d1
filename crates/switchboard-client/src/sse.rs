//! Incremental decoding of the host's `text/event-stream` into frames.

use std::collections::VecDeque;
use std::pin::Pin;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use switchboard_core::errors::TransportError;
use switchboard_core::wire::Frame;

/// Splits raw bytes into SSE records and parses each into a [`Frame`].
///
/// Bytes are buffered rather than decoded per chunk so a multi-byte UTF-8
/// sequence split across chunks survives intact.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns every record completed by it. Comment-only
    /// records (keep-alives) produce nothing.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<Frame, TransportError>> {
        self.buffer.extend(chunk.iter().copied().filter(|b| *b != b'\r'));

        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let record: Vec<u8> = self.buffer.drain(..pos + 2).collect();
            if let Some(frame) = parse_record(&String::from_utf8_lossy(&record)) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Flush a trailing record that was not terminated by a blank line.
    pub fn finish(&mut self) -> Option<Result<Frame, TransportError>> {
        let rest = std::mem::take(&mut self.buffer);
        parse_record(&String::from_utf8_lossy(&rest))
    }
}

fn field<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let value = line.strip_prefix(name)?.strip_prefix(':')?;
    Some(value.strip_prefix(' ').unwrap_or(value))
}

fn parse_record(record: &str) -> Option<Result<Frame, TransportError>> {
    let mut id = None;
    let mut event = None;
    let mut data: Vec<&str> = Vec::new();

    for line in record.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        if let Some(value) = field(line, "id") {
            id = Some(value.to_string());
        } else if let Some(value) = field(line, "event") {
            event = Some(value);
        } else if let Some(value) = field(line, "data") {
            data.push(value);
        }
    }

    if event.is_none() && data.is_empty() {
        return None;
    }
    Some(Frame::from_parts(id, event.unwrap_or("message"), &data.join("\n")))
}

type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

/// Pulls frames off an HTTP body stream.
pub struct FrameReader {
    inner: ByteStream,
    decoder: FrameDecoder,
    queued: VecDeque<Result<Frame, TransportError>>,
    done: bool,
}

impl FrameReader {
    pub fn new(stream: impl Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static) -> Self {
        Self {
            inner: Box::pin(stream),
            decoder: FrameDecoder::new(),
            queued: VecDeque::new(),
            done: false,
        }
    }

    /// Next decoded frame, or `None` once the body has ended. A network
    /// failure is reported once as `TransportError::Network`, then `None`.
    pub async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>> {
        loop {
            if let Some(frame) = self.queued.pop_front() {
                return Some(frame);
            }
            if self.done {
                return None;
            }
            match self.inner.next().await {
                Some(Ok(chunk)) => self.queued.extend(self.decoder.push(&chunk)),
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(TransportError::Network(e.to_string())));
                }
                None => {
                    self.done = true;
                    self.queued.extend(self.decoder.finish());
                }
            }
        }
    }
}
