//! Per-task SSE broadcast
//!
//! The broadcast channel sits on top of the subscription registry and
//! delivers progress payloads to every push connection open for a task.
//!
//! # Architecture
//!
//! ```text
//!   [Producer] ──broadcast(task, payload)──► BroadcastChannel
//!                                                 │ list(task) = snapshot
//!                        ┌────────────────────────┼────────────────────────┐
//!                        ▼                        ▼                        ▼
//!                 write(frame) ok          write(frame) err          write(frame) ok
//!                                                 │
//!                                   collected, evicted after the loop
//! ```
//!
//! Teardown is driven by [`PushTransport::closed`]: every accepted
//! connection gets a watcher task that unsubscribes it on close or error.

pub mod channel;
pub mod connection;
pub mod event;
pub mod frame;
pub mod transport;

pub use channel::{BroadcastChannel, Subscriber};
pub use connection::{SseConnection, SseStream};
pub use event::{ProgressEvent, TaskStatus};
pub use frame::{comment_frame, encode_payload, EventFrame};
pub use transport::{CloseReason, PushTransport, WriteError};
