//! Session callbacks
//!
//! Callbacks run inline on the session's task; keep them short.

use crate::error::Error;

use super::state::EndReason;

/// Progress reported after every successful append
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionProgress {
    /// Total bytes appended so far
    pub bytes_appended: u64,
    /// Length of the chunk just appended
    pub chunk_len: usize,
    /// Chunks appended so far
    pub chunks: u64,
}

pub(crate) type ProgressFn = Box<dyn FnMut(SessionProgress) + Send>;
pub(crate) type EndFn = Box<dyn FnOnce(EndReason) + Send>;
pub(crate) type ErrorFn = Box<dyn FnOnce(&Error) + Send>;

/// Optional observer callbacks
#[derive(Default)]
pub struct SessionCallbacks {
    pub(crate) on_progress: Option<ProgressFn>,
    pub(crate) on_end: Option<EndFn>,
    pub(crate) on_error: Option<ErrorFn>,
}

impl SessionCallbacks {
    pub(crate) fn progress(&mut self, progress: SessionProgress) {
        if let Some(f) = self.on_progress.as_mut() {
            f(progress);
        }
    }

    pub(crate) fn end(&mut self, reason: EndReason) {
        if let Some(f) = self.on_end.take() {
            f(reason);
        }
    }

    /// Hand the error to `on_error`, or give it back if nobody listens
    pub(crate) fn error(&mut self, error: Error) -> Option<Error> {
        match self.on_error.take() {
            Some(f) => {
                f(&error);
                None
            }
            None => Some(error),
        }
    }
}

impl std::fmt::Debug for SessionCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCallbacks")
            .field("on_progress", &self.on_progress.is_some())
            .field("on_end", &self.on_end.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}
