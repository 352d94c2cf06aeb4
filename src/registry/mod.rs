//! Subscription registry
//!
//! Maps a task id to the set of currently open push connections for that
//! task. This is the leaf data structure under the broadcast channel.
//!
//! # Architecture
//!
//! ```text
//!                    SubscriptionRegistry
//!             ┌────────────────────────────────┐
//!             │ tasks: HashMap<TaskId,         │
//!             │   TaskEntry {                  │
//!             │     subscribers: HashMap<      │
//!             │       ConnectionId, Arc<C>>    │
//!             │   }                            │
//!             │ >                              │
//!             └───────────────┬────────────────┘
//!                             │ list() = snapshot
//!             ┌───────────────┼────────────────┐
//!             ▼               ▼                ▼
//!        [Connection]    [Connection]     [Connection]
//! ```
//!
//! Entries exist only while they hold at least one connection.

pub mod entry;
pub mod key;
pub mod store;

pub use entry::{Connection, TaskEntry, TaskStats};
pub use key::{ConnectionId, TaskId};
pub use store::SubscriptionRegistry;
