//! Statistics for the broadcast channel and stream sessions

use std::time::{Duration, Instant};

use crate::registry::TaskId;

/// Broadcast channel snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelStats {
    /// Tasks with at least one subscriber
    pub active_tasks: usize,
    /// Subscribers across all tasks
    pub total_subscribers: usize,
    /// Ids of the active tasks, sorted
    pub task_ids: Vec<TaskId>,
}

/// Stream session counters
#[derive(Debug, Clone)]
pub struct SessionStats {
    /// Bytes appended to the host buffer
    pub bytes_appended: u64,
    /// Chunks appended to the host buffer
    pub chunks_appended: u64,
    /// Appends that needed the bounded retry
    pub append_retries: u64,
    /// When feeding started
    pub started_at: Option<Instant>,
    /// When the session reached a terminal phase
    pub finished_at: Option<Instant>,
}

impl SessionStats {
    /// Create new stats tracker
    pub fn new() -> Self {
        Self {
            bytes_appended: 0,
            chunks_appended: 0,
            append_retries: 0,
            started_at: None,
            finished_at: None,
        }
    }

    /// Record one appended chunk
    pub fn on_append(&mut self, len: usize) {
        self.bytes_appended += len as u64;
        self.chunks_appended += 1;
    }

    /// Time spent feeding (up to now if still running)
    pub fn duration(&self) -> Duration {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => end.duration_since(start),
            (Some(start), None) => start.elapsed(),
            _ => Duration::ZERO,
        }
    }

    /// Average throughput in bits per second
    pub fn bitrate(&self) -> u64 {
        let secs = self.duration().as_secs();
        if secs > 0 {
            (self.bytes_appended * 8) / secs
        } else {
            0
        }
    }
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}
