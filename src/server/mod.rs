//! Ingest server and process configuration

pub mod config;
pub mod listener;

pub use config::{ConfigError, RelayConfig, ServerConfig};
pub use listener::IngestServer;
