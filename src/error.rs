//! Error types for taskcast
//!
//! A single error enum covers both sides of the crate. Server-side
//! per-subscriber failures are usually logged and contained rather than
//! returned; client-side failures terminate the stream session.

use crate::registry::ConnectionId;

/// Result type alias for taskcast operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Non-success status or connection failure on the byte stream
    #[error("{}", transport_message(*status, reason))]
    Transport {
        /// HTTP status code, if a response was received
        status: Option<u16>,
        /// Reason phrase or underlying failure
        reason: String,
    },

    /// The transport cannot provide incremental reads
    #[error("Stream unavailable: {0}")]
    StreamUnavailable(String),

    /// Every format descriptor was rejected by the host buffer
    #[error("Unsupported media format (tried: {})", tried.join(" | "))]
    UnsupportedMediaFormat {
        /// Descriptors tried, in order
        tried: Vec<String>,
    },

    /// Append rejected after the bounded retry
    #[error("Buffer append failed: {0}")]
    BufferAppendFailure(String),

    /// The host buffer was closed while chunks remained
    #[error("Media buffer closed")]
    BufferClosed,

    /// A stream session can only be driven once
    #[error("Stream session already started")]
    AlreadyStarted,

    /// Writing to one subscriber failed
    #[error("Write to subscriber {connection} failed: {reason}")]
    SubscriberWriteFailure {
        /// Failing connection
        connection: ConnectionId,
        /// Underlying failure
        reason: String,
    },

    /// Task identifier rejected at the HTTP boundary
    #[error("Invalid task id: {0}")]
    InvalidTaskId(String),

    /// Payload serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error on a control endpoint
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn transport_message(status: Option<u16>, reason: &str) -> String {
    match status {
        Some(code) => format!("Transport error: HTTP {}: {}", code, reason),
        None => format!("Transport error: {}", reason),
    }
}

impl Error {
    /// Create a transport error for a non-success HTTP status
    pub fn status(code: u16, reason: impl Into<String>) -> Self {
        Error::Transport {
            status: Some(code),
            reason: reason.into(),
        }
    }

    /// Create a transport error with no status (connection or read failure)
    pub fn transport(reason: impl Into<String>) -> Self {
        Error::Transport {
            status: None,
            reason: reason.into(),
        }
    }

    /// HTTP status attached to a transport error, if any
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::Transport { status, .. } => *status,
            Error::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Whether this error ends a stream session for good
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::SubscriberWriteFailure { .. })
    }
}
