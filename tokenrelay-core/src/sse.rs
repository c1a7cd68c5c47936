//! Server-Sent-Events framing shared by the relay (writer) and the client (reader).

use bytes::Bytes;
use serde_json::json;

/// Event name used when a frame carries no `event:` line.
pub const DEFAULT_EVENT: &str = "message";
pub const DONE_EVENT: &str = "done";
pub const ERROR_EVENT: &str = "error";

/// Blank-line boundary between frames on the wire.
pub const FRAME_DELIMITER: &[u8] = b"\n\n";

/// One parsed SSE frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
}

impl SseFrame {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
        }
    }

    /// Serialize to wire text, terminated by the blank-line delimiter.
    /// The `event:` line is omitted for the default event name.
    pub fn encode(&self) -> String {
        if self.event == DEFAULT_EVENT {
            format!("data: {}\n\n", self.data)
        } else {
            format!("event: {}\ndata: {}\n\n", self.event, self.data)
        }
    }
}

/// Parse one raw frame (the text between two blank-line delimiters).
///
/// The last `event:` line wins; `data:` values are trimmed and concatenated
/// without a separator. Never fails: unrecognized input yields an empty
/// `message` frame.
pub fn parse_frame(chunk: &str) -> SseFrame {
    let mut event = DEFAULT_EVENT.to_string();
    let mut data = String::new();
    for line in chunk.lines() {
        if let Some(value) = line.strip_prefix("event:") {
            event = value.trim().to_string();
        } else if let Some(value) = line.strip_prefix("data:") {
            data.push_str(value.trim());
        }
    }
    SseFrame { event, data }
}

/// Units the relay writes to the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayFrame {
    /// One fragment of generated text.
    Token(String),
    /// Successful end of stream.
    Done,
    /// Failure; the stream ends after this frame.
    Error(String),
}

impl RelayFrame {
    pub fn to_frame(&self) -> SseFrame {
        match self {
            Self::Token(token) => SseFrame::new(DEFAULT_EVENT, json!({ "token": token }).to_string()),
            Self::Done => SseFrame::new(DONE_EVENT, "{}"),
            Self::Error(message) => {
                SseFrame::new(ERROR_EVENT, json!({ "message": message }).to_string())
            }
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(self.to_frame().encode())
    }
}
