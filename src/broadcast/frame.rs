//! Server-sent event frames
//!
//! Wire format:
//!
//! ```text
//! : comment\n\n
//! data: <payload>\n\n
//! event: <name>\ndata: <payload>\n\n
//! ```

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;

/// Comment written right after the handshake so proxies start forwarding
pub const CONNECTED_COMMENT: &str = "SSE connection established";

/// Comment used by the periodic keep-alive
pub const KEEP_ALIVE_COMMENT: &str = "keep-alive";

/// Headers written when the handshake owns the status line
pub const SSE_HEADERS: [(&str, &str); 5] = [
    ("Content-Type", "text/event-stream"),
    ("Cache-Control", "no-cache"),
    ("Connection", "keep-alive"),
    ("Access-Control-Allow-Origin", "*"),
    ("X-Accel-Buffering", "no"),
];

/// Headers re-declared when an upstream layer already sent the status line
pub const SSE_REDECLARED_HEADERS: [(&str, &str); 3] = [
    ("Content-Type", "text/event-stream"),
    ("Cache-Control", "no-cache"),
    ("Connection", "keep-alive"),
];

/// Encode a payload for a `data:` field
///
/// A payload that serializes to a JSON string is passed through unchanged.
/// Anything else becomes single-line JSON.
pub fn encode_payload<T: Serialize + ?Sized>(payload: &T) -> serde_json::Result<String> {
    match serde_json::to_value(payload)? {
        Value::String(s) => Ok(s),
        other => serde_json::to_string(&other),
    }
}

/// One event frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFrame {
    /// Optional event name
    pub event: Option<String>,
    /// Encoded payload
    pub data: String,
}

impl EventFrame {
    /// Unnamed data frame
    pub fn data(data: impl Into<String>) -> Self {
        Self {
            event: None,
            data: data.into(),
        }
    }

    /// Frame carrying an explicit event name
    pub fn named(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: Some(event.into()),
            data: data.into(),
        }
    }

    /// Serialize to wire bytes
    ///
    /// Multi-line payloads are split across several `data:` lines; SSE
    /// clients join them back with `\n`.
    pub fn to_bytes(&self) -> Bytes {
        let mut out = String::with_capacity(self.data.len() + 16);

        if let Some(ref name) = self.event {
            out.push_str("event: ");
            out.push_str(&single_line(name));
            out.push('\n');
        }

        for line in self.data.split('\n') {
            out.push_str("data: ");
            out.push_str(line.strip_suffix('\r').unwrap_or(line));
            out.push('\n');
        }
        out.push('\n');

        Bytes::from(out)
    }
}

/// Comment frame (`: text\n\n`)
pub fn comment_frame(text: &str) -> Bytes {
    Bytes::from(format!(": {}\n\n", single_line(text)))
}

fn single_line(s: &str) -> String {
    s.replace(['\r', '\n'], " ")
}
