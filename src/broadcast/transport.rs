//! Push transport abstraction
//!
//! The broadcast channel only needs a narrow view of a push connection:
//! declare response headers, write a frame, terminate, and learn when the
//! connection went away. Everything else belongs to the transport layer.

use async_trait::async_trait;
use bytes::Bytes;

use crate::registry::Connection;

/// Why a push connection ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Closed normally (peer went away or we terminated it)
    Closed,
    /// Transport error
    Error(String),
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::Closed => write!(f, "closed"),
            CloseReason::Error(e) => write!(f, "error: {}", e),
        }
    }
}

/// Failure of a single transport write
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WriteError {
    /// The connection is already closed
    #[error("connection closed")]
    Closed,
    /// The write itself failed
    #[error("{0}")]
    Failed(String),
}

/// A push-capable connection
///
/// Writes must not block: implementations queue the frame or fail
/// immediately. A slow or dead peer is reported through [`closed`] or a
/// failed write, never through a timeout here.
///
/// [`closed`]: PushTransport::closed
#[async_trait]
pub trait PushTransport: Connection {
    /// Whether a status line and headers already went out
    fn headers_sent(&self) -> bool;

    /// Write the status line and headers
    fn write_head(&self, status: u16, headers: &[(&str, &str)]) -> Result<(), WriteError>;

    /// Declare a header without writing a status line
    fn set_header(&self, name: &str, value: &str) -> Result<(), WriteError>;

    /// Queue one frame for the peer
    fn write(&self, frame: Bytes) -> Result<(), WriteError>;

    /// Terminate the connection
    fn end(&self) -> Result<(), WriteError>;

    /// Resolves once the connection is closed or has failed
    ///
    /// Both outcomes must resolve this future; callers rely on it as the
    /// single teardown signal.
    async fn closed(&self) -> CloseReason;
}
