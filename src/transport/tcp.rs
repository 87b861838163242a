//! FLV-over-TCP transport
//!
//! A publish is a request line carrying the stream path, terminated by
//! `\n`, followed by an FLV stream:
//!
//! ```text
//! /r1\n
//! FLV header | metadata / sequence header tags | media tags ...
//! ```
//!
//! Endpoint URLs use the `flv://host:port/path` (or `tcp://`) form; the
//! connector sends `/path\n` and then the same framing.

use async_trait::async_trait;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter,
};
use tokio::net::TcpStream;

use crate::error::{Error, Result};
use crate::media::flv;
use crate::media::FlvTag;

use super::{Connector, Origin, PacketSink, PacketSource, StreamHeader};

/// Longest request line accepted from a publisher
const MAX_REQUEST_LINE: usize = 1024;

/// Most decoder configuration tags collected before media must start
const MAX_CONFIG_TAGS: usize = 8;

/// Accept a publish on an established connection
///
/// Reads the request line and the codec descriptor; the first media tag, if
/// already read, is handed back by the first `read_packet`.
pub async fn accept<S>(stream: S) -> Result<Origin>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut reader = BufReader::new(stream);
    let path = read_request_line(&mut reader).await?;
    let (header, pending) = read_stream_header(&mut reader).await?;

    tracing::debug!(
        path = %path,
        config_tags = header.config.len(),
        "Accepted FLV publish"
    );

    let source = FlvSource {
        reader,
        pending,
        closed: false,
    };
    Ok(Origin::new(path, header, Box::new(source)))
}

async fn read_request_line<R>(reader: &mut R) -> Result<String>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let mut limited = reader.take(MAX_REQUEST_LINE as u64);
    limited.read_until(b'\n', &mut line).await?;

    if line.last() != Some(&b'\n') {
        return Err(Error::transport("missing or oversized request line"));
    }

    let line = String::from_utf8(line)
        .map_err(|_| Error::transport("request line is not UTF-8"))?;
    Ok(line.trim().to_string())
}

/// Read the FLV header and any leading decoder configuration tags
async fn read_stream_header<R>(reader: &mut R) -> Result<(StreamHeader, Option<FlvTag>)>
where
    R: AsyncRead + Unpin,
{
    let (has_audio, has_video) = flv::read_header(reader).await?;
    let mut header = StreamHeader::new(has_audio, has_video);

    while header.config.len() < MAX_CONFIG_TAGS {
        match flv::read_tag(reader).await? {
            Some(tag) if tag.is_codec_config() => header.config.push(tag),
            Some(tag) => return Ok((header, Some(tag))),
            None => return Ok((header, None)),
        }
    }

    Ok((header, None))
}

struct FlvSource<S> {
    reader: BufReader<S>,
    pending: Option<FlvTag>,
    closed: bool,
}

#[async_trait]
impl<S> PacketSource for FlvSource<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn read_packet(&mut self) -> Result<Option<FlvTag>> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }
        if let Some(tag) = self.pending.take() {
            return Ok(Some(tag));
        }
        flv::read_tag(&mut self.reader).await
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            let _ = self.reader.get_mut().shutdown().await;
        }
    }
}

/// Split an endpoint URL into `(host:port, path)`
pub fn parse_url(url: &str) -> Result<(String, String)> {
    let rest = url
        .strip_prefix("flv://")
        .or_else(|| url.strip_prefix("tcp://"))
        .ok_or_else(|| Error::transport(format!("unsupported URL scheme: {}", url)))?;

    let (authority, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, "/"),
    };

    if authority.is_empty() {
        return Err(Error::transport(format!("missing host in URL: {}", url)));
    }

    Ok((authority.to_string(), path.to_string()))
}

/// Dials endpoint URLs over TCP
#[derive(Debug, Clone)]
pub struct TcpConnector {
    tcp_nodelay: bool,
}

impl TcpConnector {
    pub fn new() -> Self {
        Self { tcp_nodelay: true }
    }

    /// Enable or disable TCP_NODELAY on outbound sockets
    pub fn tcp_nodelay(mut self, enabled: bool) -> Self {
        self.tcp_nodelay = enabled;
        self
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn PacketSink>> {
        let (addr, path) = parse_url(url)?;
        let stream = TcpStream::connect(addr.as_str()).await?;
        if self.tcp_nodelay {
            stream.set_nodelay(true)?;
        }

        let mut writer = BufWriter::new(stream);
        writer.write_all(path.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;

        tracing::debug!(addr = %addr, path = %path, "Connected to endpoint");
        Ok(Box::new(FlvSink { writer }))
    }
}

struct FlvSink<W> {
    writer: BufWriter<W>,
}

#[async_trait]
impl<W> PacketSink for FlvSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn write_header(&mut self, header: &StreamHeader) -> Result<()> {
        flv::write_header(&mut self.writer, header.has_audio, header.has_video).await?;
        for tag in &header.config {
            flv::write_tag(&mut self.writer, tag).await?;
        }
        self.writer.flush().await?;
        Ok(())
    }

    async fn write_packet(&mut self, tag: &FlvTag) -> Result<()> {
        flv::write_tag(&mut self.writer, tag).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn write_trailer(&mut self) -> Result<()> {
        self.writer.flush().await?;
        Ok(())
    }

    async fn close(&mut self) {
        let _ = self.writer.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use tokio::net::TcpListener;

    use super::*;

    #[test]
    fn test_parse_url() {
        assert_eq!(
            parse_url("flv://127.0.0.1:1935/live/key").unwrap(),
            ("127.0.0.1:1935".to_string(), "/live/key".to_string())
        );
        assert_eq!(
            parse_url("tcp://host:9000").unwrap(),
            ("host:9000".to_string(), "/".to_string())
        );
        assert!(parse_url("rtmp://host/live").is_err());
        assert!(parse_url("flv:///path").is_err());
    }

    #[tokio::test]
    async fn test_accept_reads_header_and_pending_tag() {
        let (client, server) = tokio::io::duplex(4096);

        let meta = FlvTag::script(0, Bytes::from_static(b"onMetaData"));
        let avc = FlvTag::video(0, Bytes::from_static(&[0x17, 0x00, 0x01]));
        let frame = FlvTag::video(33, Bytes::from_static(&[0x27, 0x01, 0x02]));

        let writer = tokio::spawn({
            let (meta, avc, frame) = (meta.clone(), avc.clone(), frame.clone());
            async move {
                let mut client = client;
                client.write_all(b"/r1\n").await.unwrap();
                flv::write_header(&mut client, false, true).await.unwrap();
                flv::write_tag(&mut client, &meta).await.unwrap();
                flv::write_tag(&mut client, &avc).await.unwrap();
                flv::write_tag(&mut client, &frame).await.unwrap();
                client
            }
        });

        let mut origin = accept(server).await.unwrap();
        assert_eq!(origin.stream_id(), Some("r1"));
        assert!(origin.header.has_video);
        assert_eq!(origin.header.config, vec![meta, avc]);

        let client = writer.await.unwrap();
        assert_eq!(origin.source.read_packet().await.unwrap(), Some(frame));

        drop(client);
        assert_eq!(origin.source.read_packet().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_accept_rejects_missing_request_line() {
        let (mut client, server) = tokio::io::duplex(4096);
        client.write_all(b"no newline").await.unwrap();
        drop(client);

        assert!(accept(server).await.is_err());
    }

    #[tokio::test]
    async fn test_connector_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut origin = accept(socket).await.unwrap();
            let first = origin.source.read_packet().await.unwrap();
            (origin.path, origin.header, first)
        });

        let connector = TcpConnector::new();
        let mut sink = connector
            .connect(&format!("flv://{}/dest/key", addr))
            .await
            .unwrap();

        let aac = FlvTag::audio(0, Bytes::from_static(&[0xAF, 0x00, 0x12, 0x10]));
        let header = StreamHeader::new(true, false).with_config(aac);
        let packet = FlvTag::audio(23, Bytes::from_static(&[0xAF, 0x01, 0x55]));

        sink.write_header(&header).await.unwrap();
        sink.write_packet(&packet).await.unwrap();
        sink.write_trailer().await.unwrap();
        sink.close().await;

        let (path, received_header, first) = server.await.unwrap();
        assert_eq!(path, "/dest/key");
        assert_eq!(received_header, header);
        assert_eq!(first, Some(packet));
    }
}
