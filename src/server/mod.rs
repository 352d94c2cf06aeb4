//! SSE progress server
//!
//! An axum front for the broadcast channel: it answers
//! `GET {prefix}{taskId}{suffix}` with a long-lived event stream.

pub mod config;
pub mod listener;

pub use config::ServerConfig;
pub use listener::SseServer;
