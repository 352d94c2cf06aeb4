//! Key types for subscription routing
//!
//! A [`TaskId`] is the join key between the producer, the broadcast channel
//! and a stream session. A [`ConnectionId`] identifies one push connection
//! and gives the registry its set semantics.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Error, Result};

/// Minimum length of a task id accepted at the HTTP boundary
pub const MIN_TASK_ID_LEN: usize = 10;

/// Prefixes accepted at the HTTP boundary
pub const TASK_ID_PREFIXES: [&str; 2] = ["task_", "stream_"];

/// Opaque identifier of one in-flight job
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(String);

impl TaskId {
    /// Create a task id without validation
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Parse a task id coming from an untrusted request path
    ///
    /// Must be prefixed with `task_` or `stream_` and be at least
    /// [`MIN_TASK_ID_LEN`] characters long.
    pub fn parse(id: &str) -> Result<Self> {
        if id.is_empty() {
            return Err(Error::InvalidTaskId("task id is required".into()));
        }
        if !TASK_ID_PREFIXES.iter().any(|p| id.starts_with(p)) {
            return Err(Error::InvalidTaskId(format!(
                "{} (must start with \"task_\" or \"stream_\")",
                id
            )));
        }
        if id.len() < MIN_TASK_ID_LEN {
            return Err(Error::InvalidTaskId(format!("{} (too short)", id)));
        }
        Ok(Self(id.to_string()))
    }

    /// Borrow the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identity of one push connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

impl ConnectionId {
    /// Allocate a fresh, process-unique id
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Wrap a raw value (mostly useful for tests and fakes)
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw numeric value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}
