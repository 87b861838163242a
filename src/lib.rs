//! Live stream relay
//!
//! Ingests one inbound stream per configured restream and fans it out to
//! every configured push endpoint. Restreams are defined in JSON documents
//! that can be reloaded while streams are live.
//!
//! ```text
//!   publisher ──► IngestServer ──► Relay::publish ──► FanoutQueue ──┬──► endpoint A
//!                                                                  ├──► endpoint B
//!   configs/*.json ──► Relay::reload (reconcile)                   └──► ...
//!   console / HTTP API ──► Relay::stop, Relay::list
//! ```
//!
//! # Embedding
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use rtmp_restream::definitions::DirectorySource;
//! use rtmp_restream::transport::tcp::TcpConnector;
//! use rtmp_restream::{IngestServer, Relay, ServerConfig};
//!
//! # async fn run() -> rtmp_restream::Result<()> {
//! let relay = Relay::new(
//!     Arc::new(DirectorySource::new("configs")),
//!     Arc::new(TcpConnector::new()),
//! );
//! relay.reload().await?;
//!
//! IngestServer::new(ServerConfig::default(), relay).run().await
//! # }
//! ```

pub mod api;
pub mod console;
pub mod definitions;
pub mod error;
pub mod media;
pub mod notify;
pub mod registry;
pub mod relay;
pub mod server;
pub mod stats;
pub mod transport;

pub use error::{Error, Result};
pub use registry::{RegistryError, RestreamRegistry, RestreamSnapshot};
pub use relay::Relay;
pub use server::{IngestServer, RelayConfig, ServerConfig};
