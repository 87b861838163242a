//! Registry error types
//!
//! Error types for restream registry operations.

use thiserror::Error;

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// No restream is registered under this identifier
    #[error("restream not found: {0}")]
    RestreamNotFound(String),
    /// The restream has no active origin
    #[error("restream not live: {0}")]
    NotLive(String),
    /// The restream already has an origin connected
    #[error("restream already streaming: {0}")]
    AlreadyStreaming(String),
}
