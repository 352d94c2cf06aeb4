//! Progress event shape
//!
//! The channel broadcasts any serializable payload verbatim. `ProgressEvent`
//! is the shape producers conventionally emit for task progress.

use serde::{Deserialize, Serialize};

/// Task status as reported by the producer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Accepted, not started
    Pending,
    /// In progress
    Running,
    /// Finished successfully
    Done,
    /// Failed
    Error,
}

impl TaskStatus {
    /// Whether no further progress will follow
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Error)
    }
}

/// One progress update for a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Task id
    pub id: String,
    /// Percentage, 0 to 100
    pub progress: f64,
    /// Current status
    pub status: TaskStatus,
    /// Optional human-readable title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl ProgressEvent {
    /// Create an event; progress is clamped to 0..=100
    pub fn new(id: impl Into<String>, progress: f64, status: TaskStatus) -> Self {
        Self {
            id: id.into(),
            progress: progress.clamp(0.0, 100.0),
            status,
            title: None,
        }
    }

    /// Attach a title
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}
