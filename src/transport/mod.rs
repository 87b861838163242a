//! Packet transport abstraction
//!
//! The relay core never speaks a wire protocol directly. An inbound origin
//! is a [`PacketSource`] bound to a request path and a codec descriptor
//! ([`StreamHeader`]); each outbound endpoint is a [`PacketSink`] obtained
//! from a [`Connector`].
//!
//! ```text
//!   Origin { path, header, source }          Connector::connect(url)
//!            │                                         │
//!            ▼                                         ▼
//!   source.read_packet() ──► FanoutQueue ──► sink.write_header()
//!                                      └────► sink.write_packet() ...
//!                                      └────► sink.write_trailer()
//! ```
//!
//! Two implementations ship with the crate: [`tcp`] (FLV stream framing over
//! TCP) and [`memory`] (channel-backed, for tests and embedding).

pub mod memory;
pub mod tcp;

use async_trait::async_trait;

use crate::error::Result;
use crate::media::FlvTag;

/// Codec descriptor sent to every destination before any packet
///
/// Holds the decoder configuration the origin announced up front:
/// metadata and sequence header tags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamHeader {
    /// Stream carries audio
    pub has_audio: bool,
    /// Stream carries video
    pub has_video: bool,
    /// Metadata and sequence header tags, in arrival order
    pub config: Vec<FlvTag>,
}

impl StreamHeader {
    /// Create an empty header with the given track flags
    pub fn new(has_audio: bool, has_video: bool) -> Self {
        Self {
            has_audio,
            has_video,
            config: Vec::new(),
        }
    }

    /// Append a decoder configuration tag
    pub fn with_config(mut self, tag: FlvTag) -> Self {
        self.config.push(tag);
        self
    }
}

/// Inbound side of a transport: the origin's packet stream
#[async_trait]
pub trait PacketSource: Send {
    /// Read the next packet; `Ok(None)` means the origin stopped publishing
    async fn read_packet(&mut self) -> Result<Option<FlvTag>>;

    /// Close the underlying connection
    async fn close(&mut self);
}

/// Outbound side of a transport: one destination
#[async_trait]
pub trait PacketSink: Send {
    /// Send the codec descriptor
    async fn write_header(&mut self, header: &StreamHeader) -> Result<()>;

    /// Send one packet
    async fn write_packet(&mut self, tag: &FlvTag) -> Result<()>;

    /// Signal end of stream
    async fn write_trailer(&mut self) -> Result<()>;

    /// Close the underlying connection
    async fn close(&mut self);
}

/// Opens outbound connections to endpoint URLs
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn PacketSink>>;
}

/// An accepted inbound publish, ready to be bound to a restream
pub struct Origin {
    /// Request path, e.g. `/r1`
    pub path: String,
    /// Codec descriptor announced by the publisher
    pub header: StreamHeader,
    /// Packet stream
    pub source: Box<dyn PacketSource>,
}

impl Origin {
    pub fn new(path: impl Into<String>, header: StreamHeader, source: Box<dyn PacketSource>) -> Self {
        Self {
            path: path.into(),
            header,
            source,
        }
    }

    /// Restream identifier addressed by the request path
    pub fn stream_id(&self) -> Option<&str> {
        stream_id_from_path(&self.path)
    }
}

impl std::fmt::Debug for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Origin")
            .field("path", &self.path)
            .field("header", &self.header)
            .finish_non_exhaustive()
    }
}

/// Extract the restream identifier: the first non-empty path segment
pub fn stream_id_from_path(path: &str) -> Option<&str> {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    path.split('/').find(|segment| !segment.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_id_from_path() {
        assert_eq!(stream_id_from_path("/r1"), Some("r1"));
        assert_eq!(stream_id_from_path("r1"), Some("r1"));
        assert_eq!(stream_id_from_path("/r1/extra"), Some("r1"));
        assert_eq!(stream_id_from_path("//r1"), Some("r1"));
        assert_eq!(stream_id_from_path("/r1?key=abc"), Some("r1"));
        assert_eq!(stream_id_from_path("/"), None);
        assert_eq!(stream_id_from_path(""), None);
    }

    #[test]
    fn test_header_builder() {
        let tag = FlvTag::script(0, bytes::Bytes::from_static(b"meta"));
        let header = StreamHeader::new(true, true).with_config(tag.clone());
        assert!(header.has_audio);
        assert!(header.has_video);
        assert_eq!(header.config, vec![tag]);
    }
}
