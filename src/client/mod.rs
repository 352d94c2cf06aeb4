//! Client side: stream consumption and progress subscription
//!
//! - [`ChunkReader`] pulls a chunked HTTP body incrementally
//! - [`BufferFeeder`] appends chunks to a host [`MediaBuffer`] when it is ready
//! - [`StreamControl`] talks to the stream status/stop endpoints
//! - [`ProgressSubscriber`] follows a task's SSE progress with reconnects
//!
//! The stream session that ties reader and feeder together lives in
//! [`crate::session`].

pub mod buffer;
pub mod config;
pub mod control;
pub mod events;
pub mod feeder;
pub mod reader;

pub use buffer::{AppendError, FormatDescriptor, FormatRejected, MediaBuffer, ReadyState};
pub use config::{ClientConfig, ReconnectPolicy, SessionConfig};
pub use control::{StopResponse, StreamControl, StreamStatus};
pub use events::{ProgressSubscriber, SseEvent, SseParser};
pub use feeder::BufferFeeder;
pub use reader::{ChunkReader, ChunkSource};
