//! Client-side stream sessions
//!
//! A [`StreamSession`] owns a host media buffer for the length of one
//! playback and moves bytes from a [`ChunkSource`](crate::client::ChunkSource)
//! into it.

pub mod context;
pub mod state;
pub mod stream;

pub use context::{SessionCallbacks, SessionProgress};
pub use state::{EndReason, SessionOutcome, SessionPhase};
pub use stream::{StopHandle, StreamSession};
