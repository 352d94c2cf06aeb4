//! # taskcast
//!
//! Per-task progress broadcasting over Server-Sent Events, and incremental
//! consumption of chunked media streams into a host playback buffer.
//!
//! ## Server side
//!
//! ```text
//!  producer ──broadcast()──► BroadcastChannel ──► SubscriptionRegistry
//!                                 │                 task → {connections}
//!                                 ▼
//!                      SseConnection ──body──► axum response (SseServer)
//! ```
//!
//! ```no_run
//! use taskcast::server::{ServerConfig, SseServer};
//!
//! # async fn example() -> taskcast::Result<()> {
//! let server = SseServer::new(ServerConfig::with_addr("0.0.0.0:9000".parse().unwrap()));
//! let channel = server.channel().clone();
//!
//! tokio::spawn(async move {
//!     let task = taskcast::TaskId::new("task_123456");
//!     let _ = channel.broadcast(&task, &serde_json::json!({ "progress": 10 })).await;
//! });
//!
//! server.run().await
//! # }
//! ```
//!
//! ## Client side
//!
//! ```text
//!  ChunkReader ──chunks──► StreamSession ──► BufferFeeder ──► MediaBuffer (host)
//! ```
//!
//! A host implements [`client::MediaBuffer`] and hands it to a
//! [`session::StreamSession`], which negotiates a format, feeds every chunk
//! in order and releases host resources on every exit path.

pub mod broadcast;
pub mod client;
pub mod error;
pub mod registry;
pub mod server;
pub mod session;
pub mod stats;

pub use broadcast::{BroadcastChannel, ProgressEvent, PushTransport, SseConnection, TaskStatus};
pub use error::{Error, Result};
pub use registry::{ConnectionId, SubscriptionRegistry, TaskId};
pub use session::{EndReason, StopHandle, StreamSession};
