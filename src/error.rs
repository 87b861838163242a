//! Error types
//!
//! Crate-wide error and result types. Routine stream and endpoint failures
//! are recorded as restream events; these types carry them up to the point
//! where they are logged or turned into an event.

use thiserror::Error;

use crate::definitions::DefinitionError;
use crate::registry::RegistryError;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug, Error)]
pub enum Error {
    /// Socket or file I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed data on a packet transport
    #[error("transport error: {0}")]
    Transport(String),

    /// Peer closed the transport
    #[error("connection closed")]
    ConnectionClosed,

    /// Restream definition could not be loaded
    #[error(transparent)]
    Definition(#[from] DefinitionError),

    /// Registry lookup or state error
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Webhook delivery failure
    #[error("notify error: {0}")]
    Notify(String),
}

impl Error {
    /// Create a transport error from anything printable
    pub fn transport(msg: impl Into<String>) -> Self {
        Error::Transport(msg.into())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Notify(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = Error::transport("bad tag header");
        assert_eq!(err.to_string(), "transport error: bad tag header");

        let err = Error::from(RegistryError::NotLive("r1".into()));
        assert_eq!(err.to_string(), "restream not live: r1");
    }

    #[test]
    fn test_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        assert!(matches!(Error::from(io), Error::Io(_)));
    }
}
