//! Event-stream framing on the client side.
//!
//! [`FrameDecoder`] turns raw body chunks into [`ServerFrame`]s. Chunks may
//! split a frame (or a UTF-8 sequence) anywhere; the decoder buffers until a
//! full line is available. Lines end in `\n` or `\r\n`.

use searchcast_core::{parse_status_event, StatusEvent};

/// Event-type tag of a regular status update.
pub const STATUS_UPDATE_EVENT: &str = "search-status-update";

/// Event-type tag of the terminal error frame.
pub const ERROR_EVENT: &str = "error";

/// Event type of a frame that carries no `event:` line.
const DEFAULT_EVENT: &str = "message";

/// One dispatched event-stream unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerFrame {
    pub event: String,
    pub data: String,
    pub id: Option<String>,
}

/// What a frame means to the reconciliation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    StatusUpdate(StatusEvent),
    /// Terminal error; the server closes the stream after it.
    Error(String),
    /// Unknown event type or undecodable payload.
    Ignored,
}

impl ServerFrame {
    /// Interpret this frame.
    ///
    /// A status update whose payload does not decode is logged and
    /// [`Ignored`](StreamMessage::Ignored); it never ends the stream.
    pub fn classify(&self) -> StreamMessage {
        match self.event.as_str() {
            STATUS_UPDATE_EVENT => match parse_status_event(&self.data) {
                Ok(event) => StreamMessage::StatusUpdate(event),
                Err(e) => {
                    tracing::warn!(error = %e, data = %self.data, "Dropping undecodable status frame");
                    StreamMessage::Ignored
                }
            },
            ERROR_EVENT => StreamMessage::Error(error_message(&self.data)),
            other => {
                tracing::trace!(event = other, "Ignoring frame with unknown event type");
                StreamMessage::Ignored
            }
        }
    }
}

/// Pull the message out of an `{"error": "..."}` payload, falling back to
/// the raw text.
fn error_message(data: &str) -> String {
    serde_json::from_str::<serde_json::Value>(data)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or_else(|| data.to_string())
}

/// Incremental text/event-stream decoder.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one body chunk; returns every frame it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<ServerFrame> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
        }
        frames
    }

    fn process_line(&mut self, line: &str) -> Option<ServerFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        // Comment, used for keep-alives.
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<ServerFrame> {
        let event = self.event.take();
        let id = self.id.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(ServerFrame {
            event: event.unwrap_or_else(|| DEFAULT_EVENT.to_string()),
            data,
            id,
        })
    }
}
