//! Progress event subscriber
//!
//! Consumes a `text/event-stream` response and reconnects after a drop,
//! following a [`ReconnectPolicy`].
//!
//! ```text
//!  connect ──► parse frames ──► on_event ──Break──► done
//!     ▲              │
//!     │         drop/error ──after DONE/ERROR──► done
//!     └── backoff ◄──┘   (4xx fails immediately)
//! ```

use std::ops::ControlFlow;
use std::time::Duration;

use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::broadcast::TaskStatus;
use crate::error::{Error, Result};

use super::config::ReconnectPolicy;

/// One dispatched server-sent event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// `event:` name; `None` means the default `message` type
    pub event: Option<String>,
    /// `data:` lines joined with `\n`
    pub data: String,
    /// Last `id:` seen
    pub id: Option<String>,
}

impl SseEvent {
    /// Event type, defaulting to `message`
    pub fn event_type(&self) -> &str {
        self.event.as_deref().unwrap_or("message")
    }

    /// Decode the data as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.data)?)
    }
}

/// Longest line the parser buffers before dropping it
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Incremental `text/event-stream` parser
///
/// Bytes may arrive split anywhere, including inside a line or a UTF-8
/// sequence; only complete lines are interpreted.
#[derive(Debug, Default)]
pub struct SseParser {
    /// Unterminated tail of the last chunk
    pending: Vec<u8>,
    /// Skipping the rest of an oversized line
    discarding: bool,
    event: Option<String>,
    data: Vec<String>,
    last_id: Option<String>,
    retry: Option<Duration>,
}

impl SseParser {
    /// Create an empty parser
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconnect delay requested by the server through `retry:`
    pub fn retry(&self) -> Option<Duration> {
        self.retry
    }

    /// Feed raw bytes, returning every event they complete
    ///
    /// Only the new bytes are scanned for line ends. A line growing past
    /// [`MAX_LINE_LEN`] is dropped up to its newline.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        let mut events = Vec::new();
        let mut rest = bytes;

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            let (head, tail) = rest.split_at(pos);
            rest = &tail[1..];

            if self.discarding {
                self.discarding = false;
                continue;
            }

            let mut line = std::mem::take(&mut self.pending);
            line.extend_from_slice(head);
            if line.last() == Some(&b'\r') {
                line.pop();
            }

            let line = String::from_utf8_lossy(&line);
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }

        if !self.discarding {
            self.pending.extend_from_slice(rest);
            if self.pending.len() > MAX_LINE_LEN {
                tracing::warn!(len = self.pending.len(), "Dropping oversized event stream line");
                self.pending = Vec::new();
                self.discarding = true;
            }
        }
        events
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
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
            "id" => self.last_id = Some(value.to_string()),
            "retry" => {
                if let Ok(ms) = value.parse::<u64>() {
                    self.retry = Some(Duration::from_millis(ms));
                }
            }
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }

        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent {
            event,
            data,
            id: self.last_id.clone(),
        })
    }
}

/// Reconnecting consumer of a task's progress events
#[derive(Debug, Clone)]
pub struct ProgressSubscriber {
    client: reqwest::Client,
    url: String,
    policy: ReconnectPolicy,
}

#[derive(Default)]
struct Attempt {
    received: usize,
    retry: Option<Duration>,
    /// Last event reported a finished task
    finished: bool,
}

impl ProgressSubscriber {
    /// Create a subscriber for an event stream URL
    pub fn new(client: reqwest::Client, url: impl Into<String>, policy: ReconnectPolicy) -> Self {
        Self {
            client,
            url: url.into(),
            policy,
        }
    }

    /// Event stream URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Deliver events to `on_event` until it breaks
    ///
    /// A dropped stream is reopened after the policy's backoff, or after the
    /// server's `retry:` hint when it is longer. Attempts are counted from
    /// the last connection that delivered an event. A 4xx answer is not
    /// retried. A stream the server closes right after a `DONE` or `ERROR`
    /// status is complete and is not reopened.
    pub async fn run<F>(&self, mut on_event: F) -> Result<()>
    where
        F: FnMut(SseEvent) -> ControlFlow<()>,
    {
        let mut attempt = 0u32;
        let mut server_retry = None;

        loop {
            let mut state = Attempt::default();
            let error = match self.connect_once(&mut on_event, &mut state).await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };

            if matches!(error.status_code(), Some(400..=499)) {
                return Err(error);
            }

            if state.received > 0 {
                attempt = 0;
            }
            server_retry = state.retry.or(server_retry);

            attempt += 1;
            if !self.policy.allows(attempt) {
                tracing::warn!(url = %self.url, attempts = attempt - 1, error = %error, "Giving up on event stream");
                return Err(error);
            }

            let mut delay = self.policy.delay_for(attempt);
            if let Some(hint) = server_retry {
                delay = delay.max(hint);
            }

            tracing::warn!(
                url = %self.url,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Event stream dropped, reconnecting"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn connect_once<F>(&self, on_event: &mut F, state: &mut Attempt) -> Result<()>
    where
        F: FnMut(SseEvent) -> ControlFlow<()>,
    {
        let response = self
            .client
            .get(&self.url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| Error::transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::status(
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown"),
            ));
        }

        tracing::debug!(url = %self.url, "Event stream connected");

        let mut parser = SseParser::new();
        let mut body = Box::pin(response.bytes_stream());

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| Error::transport(e.to_string()))?;

            for event in parser.feed(&chunk) {
                state.received += 1;
                state.finished = reports_terminal_status(&event);
                if on_event(event).is_break() {
                    return Ok(());
                }
            }
            state.retry = parser.retry();
        }

        if state.finished {
            tracing::debug!(url = %self.url, "Event stream closed after final status");
            return Ok(());
        }
        Err(Error::transport("event stream closed"))
    }
}

/// Whether an event carries a `status` of `DONE` or `ERROR`
fn reports_terminal_status(event: &SseEvent) -> bool {
    #[derive(Deserialize)]
    struct StatusOnly {
        status: TaskStatus,
    }

    event
        .json::<StatusOnly>()
        .map(|payload| payload.status.is_terminal())
        .unwrap_or(false)
}
