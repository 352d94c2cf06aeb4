//! In-process SSE connection
//!
//! [`SseConnection`] is the write side handed to the broadcast channel. Frames
//! go into an unbounded queue, so writes never block the fan-out. The paired
//! [`SseStream`] is the read side, handed to the HTTP layer as a response
//! body.
//!
//! The head is recorded, not serialized: `write_head` stores the status and
//! headers, and the HTTP layer builds its response from
//! [`status`](SseConnection::status) and
//! [`declared_headers`](SseConnection::declared_headers).

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use tokio::sync::{mpsc, watch};

use crate::registry::{Connection, ConnectionId};

use super::transport::{CloseReason, PushTransport, WriteError};

enum Message {
    Frame(Bytes),
    End,
}

#[derive(Debug, Default)]
struct HeadState {
    /// Status already committed (by the handshake or by an upstream layer)
    sent: bool,
    /// Status written through `write_head`
    status: Option<u16>,
    /// Headers declared so far
    headers: Vec<(String, String)>,
}

struct Shared {
    tx: mpsc::UnboundedSender<Message>,
    head: Mutex<HeadState>,
    close_tx: watch::Sender<Option<CloseReason>>,
}

impl Shared {
    fn head(&self) -> MutexGuard<'_, HeadState> {
        self.head.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_closed(&self) -> bool {
        self.close_tx.borrow().is_some() || self.tx.is_closed()
    }

    /// Record the first close reason; later ones are ignored
    fn set_closed(&self, reason: CloseReason) {
        self.close_tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        });
    }
}

/// Write side of an SSE connection
///
/// Clones share the same underlying connection and [`ConnectionId`].
#[derive(Clone)]
pub struct SseConnection {
    id: ConnectionId,
    shared: Arc<Shared>,
}

impl SseConnection {
    /// Create a connection whose handshake owns the status and headers
    pub fn new() -> (Self, SseStream) {
        Self::build(false)
    }

    /// Create a connection whose status line was already sent upstream
    ///
    /// Headers declared by the handshake are recorded in
    /// [`declared_headers`](Self::declared_headers) for the upstream layer.
    pub fn with_headers_sent() -> (Self, SseStream) {
        Self::build(true)
    }

    fn build(headers_sent: bool) -> (Self, SseStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (close_tx, _) = watch::channel(None);

        let shared = Arc::new(Shared {
            tx,
            head: Mutex::new(HeadState {
                sent: headers_sent,
                ..Default::default()
            }),
            close_tx,
        });

        let conn = Self {
            id: ConnectionId::next(),
            shared,
        };

        (conn, SseStream { rx, done: false })
    }

    /// Connection id
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Status written by the handshake, if it owned the status line
    pub fn status(&self) -> Option<u16> {
        self.shared.head().status
    }

    /// Headers declared so far
    pub fn declared_headers(&self) -> Vec<(String, String)> {
        self.shared.head().headers.clone()
    }

    /// Mark the connection closed by the peer
    pub fn mark_closed(&self) {
        self.shared.set_closed(CloseReason::Closed);
    }

    /// Mark the connection failed
    pub fn fail(&self, reason: impl Into<String>) {
        self.shared.set_closed(CloseReason::Error(reason.into()));
    }

    /// Whether the connection is closed
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    fn send(&self, message: Message) -> Result<(), WriteError> {
        if self.shared.close_tx.borrow().is_some() {
            return Err(WriteError::Closed);
        }
        self.shared.tx.send(message).map_err(|_| WriteError::Closed)
    }
}

impl Connection for SseConnection {
    fn connection_id(&self) -> ConnectionId {
        self.id
    }
}

#[async_trait]
impl PushTransport for SseConnection {
    fn headers_sent(&self) -> bool {
        self.shared.head().sent
    }

    fn write_head(&self, status: u16, headers: &[(&str, &str)]) -> Result<(), WriteError> {
        let mut head = self.shared.head();
        if head.sent {
            return Err(WriteError::Failed("headers already sent".into()));
        }

        if self.is_closed() {
            return Err(WriteError::Closed);
        }

        head.sent = true;
        head.status = Some(status);
        head.headers = headers
            .iter()
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .collect();
        Ok(())
    }

    fn set_header(&self, name: &str, value: &str) -> Result<(), WriteError> {
        let mut head = self.shared.head();
        match head
            .headers
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
        {
            Some(existing) => existing.1 = value.to_string(),
            None => head.headers.push((name.to_string(), value.to_string())),
        }
        Ok(())
    }

    fn write(&self, frame: Bytes) -> Result<(), WriteError> {
        self.send(Message::Frame(frame))
    }

    fn end(&self) -> Result<(), WriteError> {
        if self.shared.close_tx.borrow().is_some() {
            return Ok(());
        }
        let result = self.shared.tx.send(Message::End).map_err(|_| WriteError::Closed);
        self.mark_closed();
        result
    }

    async fn closed(&self) -> CloseReason {
        let mut close_rx = self.shared.close_tx.subscribe();

        loop {
            let current = close_rx.borrow_and_update().clone();
            if let Some(reason) = current {
                return reason;
            }

            tokio::select! {
                changed = close_rx.changed() => {
                    if changed.is_err() {
                        return CloseReason::Closed;
                    }
                }
                // Read side dropped: the peer is gone
                _ = self.shared.tx.closed() => return CloseReason::Closed,
            }
        }
    }
}

/// Read side of an SSE connection
pub struct SseStream {
    rx: mpsc::UnboundedReceiver<Message>,
    done: bool,
}

impl SseStream {
    /// Next frame, or `None` once the connection was terminated
    pub async fn recv(&mut self) -> Option<Bytes> {
        if self.done {
            return None;
        }
        match self.rx.recv().await {
            Some(Message::Frame(bytes)) => Some(bytes),
            Some(Message::End) | None => {
                self.done = true;
                None
            }
        }
    }

    /// Convert into a `Stream` of frames, e.g. for a response body
    pub fn into_stream(self) -> impl Stream<Item = Bytes> + Send + 'static {
        futures::stream::unfold(self, |mut stream| async move {
            stream.recv().await.map(|frame| (frame, stream))
        })
    }
}
