//! Session state machine
//!
//! ```text
//! Idle ──► Negotiating ──► Feeding ──► Ended
//!               │             │
//!               └──► Errored ◄┘
//! ```

/// Stream session lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Created, not started
    Idle,
    /// Trying format descriptors against the host buffer
    Negotiating,
    /// Reading chunks and appending them
    Feeding,
    /// Finished normally or stopped
    Ended,
    /// Finished with an error
    Errored,
}

impl SessionPhase {
    /// Whether the session can no longer make progress
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionPhase::Ended | SessionPhase::Errored)
    }
}

/// Why a session ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The source reached end of stream
    Completed,
    /// Stop was requested through a [`StopHandle`](super::StopHandle)
    Stopped,
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndReason::Completed => write!(f, "completed"),
            EndReason::Stopped => write!(f, "stopped"),
        }
    }
}

/// Result of driving a session to a terminal phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Reached [`SessionPhase::Ended`]
    Ended(EndReason),
    /// Reached [`SessionPhase::Errored`]; the error went to `on_error`
    Errored,
}
