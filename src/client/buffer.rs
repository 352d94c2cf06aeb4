//! Host media buffer contract
//!
//! The playback surface owns an incremental media buffer (think of an MSE
//! `SourceBuffer` behind its `MediaSource`). The stream session only needs a
//! readiness query, append, end-of-stream, format negotiation and a way to
//! release temporary host resources.
//!
//! Rejection of a format descriptor ([`FormatRejected`]) is a different type
//! from rejection of an append ([`AppendError`]), so negotiation failures can
//! never be confused with feeding failures.

use async_trait::async_trait;
use bytes::Bytes;

/// Codec/container identifier tried during negotiation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FormatDescriptor(String);

impl FormatDescriptor {
    /// Create a descriptor, e.g. `video/mp4; codecs="avc1.64001f, mp4a.40.2"`
    pub fn new(descriptor: impl Into<String>) -> Self {
        Self(descriptor.into())
    }

    /// Descriptor text
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Container MIME type without parameters
    pub fn mime_type(&self) -> &str {
        self.0.split(';').next().unwrap_or_default().trim()
    }
}

impl std::fmt::Display for FormatDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FormatDescriptor {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for FormatDescriptor {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// State of the host buffer's owner (mirrors a media source's ready state)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// Not attached, or closed by an external error
    Closed,
    /// Accepting appends
    Open,
    /// End of stream signalled
    Ended,
}

/// The host refused a format descriptor
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("format rejected: {0}")]
pub struct FormatRejected(pub String);

/// The host refused an append
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AppendError {
    /// Temporarily unavailable (busy, quota); worth one retry
    #[error("buffer temporarily unavailable: {0}")]
    Transient(String),
    /// Rejected for good
    #[error("append rejected: {0}")]
    Fatal(String),
}

/// Incremental media buffer provided by the playback host
#[async_trait]
pub trait MediaBuffer: Send {
    /// Try to attach with the given format
    fn add_source(&mut self, format: &FormatDescriptor) -> Result<(), FormatRejected>;

    /// Whether an append is still being processed
    fn is_busy(&self) -> bool;

    /// Resolves when the current append has been processed
    async fn idle(&mut self);

    /// Current ready state
    fn ready_state(&self) -> ReadyState;

    /// Append one chunk; must only be called when not busy
    fn append(&mut self, chunk: &Bytes) -> Result<(), AppendError>;

    /// Signal end of stream
    fn end_of_stream(&mut self) -> Result<(), AppendError>;

    /// Release temporary host resources (object URLs and the like)
    fn release(&mut self);
}

#[cfg(test)]
pub(crate) mod fake {
    //! Scriptable buffer used by the feeder and session tests

    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use super::*;

    /// What the fake saw, shared with the test after the buffer moves
    #[derive(Debug, Default)]
    pub struct Journal {
        pub attempted_formats: Vec<String>,
        pub appends: Vec<Bytes>,
        pub append_calls: usize,
        pub idle_waits: usize,
        pub end_of_stream_calls: usize,
        pub release_calls: usize,
    }

    pub struct FakeBuffer {
        pub journal: Arc<Mutex<Journal>>,
        pub accepted_formats: Vec<String>,
        pub state: ReadyState,
        /// Busy for this many `is_busy` checks after every append
        pub busy_after_append: usize,
        busy_remaining: usize,
        /// Scripted append results, consumed in order; default is Ok
        pub append_script: VecDeque<Result<(), AppendError>>,
        /// Close the buffer after this many successful appends
        pub close_after: Option<usize>,
        /// `idle` never resolves
        pub stalled: bool,
    }

    impl FakeBuffer {
        pub fn new() -> Self {
            Self {
                journal: Arc::new(Mutex::new(Journal::default())),
                accepted_formats: Vec::new(),
                state: ReadyState::Closed,
                busy_after_append: 0,
                busy_remaining: 0,
                append_script: VecDeque::new(),
                close_after: None,
                stalled: false,
            }
        }

        /// Accept any descriptor, already open
        pub fn open() -> Self {
            let mut buffer = Self::new();
            buffer.state = ReadyState::Open;
            buffer.accepted_formats.push("*".into());
            buffer
        }

        pub fn accepting(formats: &[&str]) -> Self {
            let mut buffer = Self::new();
            buffer.accepted_formats = formats.iter().map(|f| f.to_string()).collect();
            buffer
        }

        pub fn journal(&self) -> Arc<Mutex<Journal>> {
            Arc::clone(&self.journal)
        }
    }

    #[async_trait]
    impl MediaBuffer for FakeBuffer {
        fn add_source(&mut self, format: &FormatDescriptor) -> Result<(), FormatRejected> {
            self.journal
                .lock()
                .unwrap()
                .attempted_formats
                .push(format.to_string());

            let accepted = self
                .accepted_formats
                .iter()
                .any(|f| f == "*" || f == format.as_str());
            if accepted {
                self.state = ReadyState::Open;
                Ok(())
            } else {
                Err(FormatRejected(format.to_string()))
            }
        }

        fn is_busy(&self) -> bool {
            self.busy_remaining > 0
        }

        async fn idle(&mut self) {
            self.journal.lock().unwrap().idle_waits += 1;
            if self.stalled {
                std::future::pending::<()>().await;
            }
            tokio::task::yield_now().await;
            self.busy_remaining = self.busy_remaining.saturating_sub(1);
        }

        fn ready_state(&self) -> ReadyState {
            self.state
        }

        fn append(&mut self, chunk: &Bytes) -> Result<(), AppendError> {
            assert!(!self.is_busy(), "append while busy");

            let mut journal = self.journal.lock().unwrap();
            journal.append_calls += 1;

            if let Some(result) = self.append_script.pop_front() {
                result?;
            }

            journal.appends.push(chunk.clone());
            self.busy_remaining = self.busy_after_append;

            if self.close_after == Some(journal.appends.len()) {
                self.state = ReadyState::Closed;
            }
            Ok(())
        }

        fn end_of_stream(&mut self) -> Result<(), AppendError> {
            self.journal.lock().unwrap().end_of_stream_calls += 1;
            self.state = ReadyState::Ended;
            Ok(())
        }

        fn release(&mut self) {
            self.journal.lock().unwrap().release_calls += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_type() {
        let format = FormatDescriptor::new(r#"video/mp4; codecs="avc1.64001f, mp4a.40.2""#);
        assert_eq!(format.mime_type(), "video/mp4");
        assert_eq!(FormatDescriptor::from("video/webm").mime_type(), "video/webm");
    }

    #[test]
    fn test_rejections_are_distinct_types() {
        let format = FormatRejected("video/ogg".into());
        let append = AppendError::Transient("busy".into());

        assert_eq!(format.to_string(), "format rejected: video/ogg");
        assert_eq!(append.to_string(), "buffer temporarily unavailable: busy");
    }
}
