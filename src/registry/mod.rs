//! Restream registry and fan-out
//!
//! The registry maps restream identifiers to their live state. Each
//! streaming restream owns a [`FanoutQueue`] built on
//! `tokio::sync::broadcast`, which decouples the origin from every endpoint.
//!
//! # Architecture
//!
//! ```text
//!                        Arc<RestreamRegistry>
//!                 ┌──────────────────────────────────┐
//!                 │ restreams: HashMap<Id,           │
//!                 │   Arc<RwLock<Restream {          │
//!                 │     endpoints, events, stats,    │
//!                 │     control: ControlChannel,     │
//!                 │     session: Option<Session {    │
//!                 │       queue: FanoutQueue, ... }> │
//!                 │   }>>                            │
//!                 │ >                                │
//!                 └────────────────┬─────────────────┘
//!                                  │
//!        ┌─────────────────────────┼─────────────────────────┐
//!        │                         │                         │
//!        ▼                         ▼                         ▼
//!    [Origin]                [Endpoint A]              [Endpoint B]
//!    read_packet()           reader.recv()             reader.recv()
//!        │                         │                         │
//!        └──► queue.push() ──────► write_packet() ──► destination
//! ```
//!
//! # Zero-Copy Design
//!
//! `bytes::Bytes` uses reference counting, so all endpoints share the same
//! memory allocation for a packet. The broadcast channel clones the
//! `FlvTag`, but the inner payload is only reference-counted, not copied.

pub mod entry;
pub mod error;
pub mod event;
pub mod queue;
pub mod store;

pub use entry::{
    ControlChannel, ControlSignal, Endpoint, EndpointSnapshot, Restream, RestreamSnapshot, Session,
};
pub use error::RegistryError;
pub use event::{Event, EventLevel};
pub use queue::{FanoutQueue, QueueClosed, QueueReader};
pub use store::{RegistryWriter, RestreamHandle, RestreamRegistry};
