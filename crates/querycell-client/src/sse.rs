//! Incremental decoder for `text/event-stream` framing.
//!
//! Records are delimited by blank lines; fields are `event:`, `data:`,
//! `id:` and `retry:`. A field or record may span multiple underlying
//! reads, so the decoder buffers incomplete lines across `feed` calls.

use bytes::Bytes;
use futures::{Stream, StreamExt};

/// One complete server-sent-event record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseRecord {
    /// Event name; `None` for unnamed (`message`) events.
    pub event: Option<String>,
    /// Data lines joined with `\n`.
    pub data: String,
    /// Last seen event id, if any.
    pub id: Option<String>,
    /// Reconnection delay advertised by the server, in milliseconds.
    pub retry: Option<u64>,
}

/// Incremental SSE decoder.
///
/// Feed it raw bytes as they arrive; it emits a record for every
/// blank-line-terminated frame, independent of how the bytes were chunked.
/// A frame left incomplete when the stream ends is discarded.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data_lines: Vec<String>,
    id: Option<String>,
    retry: Option<u64>,
}

impl SseDecoder {
    /// Create a new decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes, returning every record completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseRecord> {
        self.buffer.extend_from_slice(chunk);

        let mut records = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=newline).collect();
            line.pop(); // the newline itself
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line).into_owned();
            if let Some(record) = self.take_line(&line) {
                records.push(record);
            }
        }
        records
    }

    /// Process one complete line; returns a record when the line is the
    /// blank delimiter of a frame that carried data.
    fn take_line(&mut self, line: &str) -> Option<SseRecord> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None; // comment
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = (!value.is_empty()).then(|| value.to_string()),
            "data" => self.data_lines.push(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            "retry" => {
                if let Ok(ms) = value.parse::<u64>() {
                    self.retry = Some(ms);
                }
            }
            _ => {} // unknown field, ignored
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseRecord> {
        if self.data_lines.is_empty() {
            // A frame without data is not dispatched; event name resets.
            self.event = None;
            self.retry = None;
            return None;
        }

        Some(SseRecord {
            event: self.event.take(),
            data: std::mem::take(&mut self.data_lines).join("\n"),
            id: self.id.clone(),
            retry: self.retry.take(),
        })
    }
}

/// Drive a decoder over an async byte stream, invoking `on_event` for each
/// complete record in arrival order.
///
/// Resolves `Ok(())` at end-of-stream. On transport error all partially
/// buffered data is discarded and the error propagates.
///
/// # Errors
/// Returns the first transport or callback error.
pub async fn consume<S, E>(
    byte_stream: S,
    mut on_event: impl AsyncFnMut(SseRecord) -> Result<(), E>,
) -> Result<(), E>
where
    S: Stream<Item = Result<Bytes, E>>,
{
    let mut stream = std::pin::pin!(byte_stream);
    let mut decoder = SseDecoder::new();

    while let Some(chunk) = stream.next().await {
        for record in decoder.feed(&chunk?) {
            on_event(record).await?;
        }
    }
    Ok(())
}
