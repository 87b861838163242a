//! FLV tag model and stream framing
//!
//! Every packet that flows through a restream is an FLV tag body: the same
//! payload an RTMP audio/video/data message carries. The relay never looks
//! inside a payload beyond the first two bytes, which are enough to tell
//! sequence headers (codec configuration) from media frames.
//!
//! On the wire (FLV stream framing, used by the bundled TCP transport):
//! ```text
//! +-----------+---------+-------+------------+----------+
//! | "FLV" (3) | Ver (1) | Flags | HdrSize(4) | PrevTag0 |
//! +-----------+---------+-------+------------+----------+
//! then repeated:
//! +--------+-------------+-----------+-------------+---------+-------------+
//! | Type(1)| DataSize(3) | TS(3+1)   | StreamID(3) | Data(N) | PrevSize(4) |
//! +--------+-------------+-----------+-------------+---------+-------------+
//! ```

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

/// FLV signature
pub const FLV_SIGNATURE: [u8; 3] = *b"FLV";

/// FLV version (always 1)
const FLV_VERSION: u8 = 0x01;

/// FLV header is always 9 bytes
const FLV_HEADER_SIZE: u32 = 9;

/// Type flag bits in the FLV header
const FLV_FLAG_AUDIO: u8 = 0x04;
const FLV_FLAG_VIDEO: u8 = 0x01;

/// FLV tag type codes
const FLV_TAG_AUDIO: u8 = 8;
const FLV_TAG_VIDEO: u8 = 9;
const FLV_TAG_SCRIPT: u8 = 18;

/// Size of a tag header on the wire
const TAG_HEADER_SIZE: usize = 11;

/// FLV tag type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlvTagType {
    Audio,
    Video,
    Script,
}

impl FlvTagType {
    fn from_code(code: u8) -> Option<Self> {
        match code & 0x1F {
            FLV_TAG_AUDIO => Some(FlvTagType::Audio),
            FLV_TAG_VIDEO => Some(FlvTagType::Video),
            FLV_TAG_SCRIPT => Some(FlvTagType::Script),
            _ => None,
        }
    }

    fn code(self) -> u8 {
        match self {
            FlvTagType::Audio => FLV_TAG_AUDIO,
            FlvTagType::Video => FLV_TAG_VIDEO,
            FlvTagType::Script => FLV_TAG_SCRIPT,
        }
    }
}

/// A single timestamped packet
///
/// Cheap to clone: the payload is reference counted, so every endpoint
/// reading from the fan-out queue shares one allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlvTag {
    /// Tag type
    pub tag_type: FlvTagType,
    /// Timestamp in milliseconds
    pub timestamp: u32,
    /// Raw tag data (including codec headers)
    pub data: Bytes,
}

/// Codec IDs whose second payload byte is a packet type (0 = sequence header)
const AVC_CODEC_ID: u8 = 7;
const HEVC_CODEC_ID: u8 = 12;
const AAC_FORMAT_ID: u8 = 10;

impl FlvTag {
    /// Create a new video tag
    pub fn video(timestamp: u32, data: Bytes) -> Self {
        Self {
            tag_type: FlvTagType::Video,
            timestamp,
            data,
        }
    }

    /// Create a new audio tag
    pub fn audio(timestamp: u32, data: Bytes) -> Self {
        Self {
            tag_type: FlvTagType::Audio,
            timestamp,
            data,
        }
    }

    /// Create a script data (metadata) tag
    pub fn script(timestamp: u32, data: Bytes) -> Self {
        Self {
            tag_type: FlvTagType::Script,
            timestamp,
            data,
        }
    }

    /// Check if this is a video tag
    pub fn is_video(&self) -> bool {
        self.tag_type == FlvTagType::Video
    }

    /// Check if this is an audio tag
    pub fn is_audio(&self) -> bool {
        self.tag_type == FlvTagType::Audio
    }

    /// Check if this is a video decoder configuration record (AVC or HEVC)
    pub fn is_video_sequence_header(&self) -> bool {
        match (self.is_video(), self.data.first(), self.data.get(1)) {
            (true, Some(b0), Some(0)) => matches!(b0 & 0x0F, AVC_CODEC_ID | HEVC_CODEC_ID),
            _ => false,
        }
    }

    /// Check if this is an AAC AudioSpecificConfig
    pub fn is_aac_sequence_header(&self) -> bool {
        match (self.is_audio(), self.data.first(), self.data.get(1)) {
            (true, Some(b0), Some(0)) => (b0 >> 4) & 0x0F == AAC_FORMAT_ID,
            _ => false,
        }
    }

    /// Check if this tag configures a decoder rather than carrying media
    pub fn is_codec_config(&self) -> bool {
        self.tag_type == FlvTagType::Script
            || self.is_video_sequence_header()
            || self.is_aac_sequence_header()
    }

    /// Get the size of the tag data
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Write the FLV stream header (9 bytes) plus PreviousTagSize0
pub async fn write_header<W>(writer: &mut W, has_audio: bool, has_video: bool) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut flags = 0u8;
    if has_audio {
        flags |= FLV_FLAG_AUDIO;
    }
    if has_video {
        flags |= FLV_FLAG_VIDEO;
    }

    let mut buf = Vec::with_capacity(13);
    buf.extend_from_slice(&FLV_SIGNATURE);
    buf.push(FLV_VERSION);
    buf.push(flags);
    buf.extend_from_slice(&FLV_HEADER_SIZE.to_be_bytes());
    buf.extend_from_slice(&0u32.to_be_bytes());

    writer.write_all(&buf).await?;
    Ok(())
}

/// Read the FLV stream header, returning `(has_audio, has_video)`
pub async fn read_header<R>(reader: &mut R) -> Result<(bool, bool)>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 9];
    reader.read_exact(&mut buf).await?;

    if buf[..3] != FLV_SIGNATURE {
        return Err(Error::transport("missing FLV signature"));
    }

    // Version 1 headers are exactly 9 bytes; extensions are not accepted
    let header_size = u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]);
    if header_size != FLV_HEADER_SIZE {
        return Err(Error::transport(format!(
            "invalid FLV header size {}",
            header_size
        )));
    }

    let mut prev_tag_size = [0u8; 4];
    reader.read_exact(&mut prev_tag_size).await?;

    Ok((buf[4] & FLV_FLAG_AUDIO != 0, buf[4] & FLV_FLAG_VIDEO != 0))
}

/// Write one tag followed by its PreviousTagSize
pub async fn write_tag<W>(writer: &mut W, tag: &FlvTag) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let data_size = tag.data.len() as u32;
    if data_size > 0x00FF_FFFF {
        return Err(Error::transport(format!(
            "tag payload too large: {} bytes",
            data_size
        )));
    }

    let ts = tag.timestamp;
    let header = [
        tag.tag_type.code(),
        // Data size (24-bit BE)
        (data_size >> 16) as u8,
        (data_size >> 8) as u8,
        data_size as u8,
        // Timestamp: lower 24 bits, then upper 8 bits (extension byte)
        (ts >> 16) as u8,
        (ts >> 8) as u8,
        ts as u8,
        (ts >> 24) as u8,
        // Stream ID (always 0)
        0,
        0,
        0,
    ];

    writer.write_all(&header).await?;
    writer.write_all(&tag.data).await?;
    writer
        .write_all(&(TAG_HEADER_SIZE as u32 + data_size).to_be_bytes())
        .await?;
    Ok(())
}

/// Read the next tag
///
/// Returns `Ok(None)` when the stream ends cleanly on a tag boundary.
pub async fn read_tag<R>(reader: &mut R) -> Result<Option<FlvTag>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; TAG_HEADER_SIZE];
    if reader.read(&mut header[..1]).await? == 0 {
        return Ok(None);
    }
    reader.read_exact(&mut header[1..]).await?;

    let tag_type = FlvTagType::from_code(header[0])
        .ok_or_else(|| Error::transport(format!("unknown tag type {}", header[0])))?;
    let data_size = u32::from_be_bytes([0, header[1], header[2], header[3]]) as usize;
    let timestamp = u32::from_be_bytes([header[7], header[4], header[5], header[6]]);

    let mut data = vec![0u8; data_size];
    reader.read_exact(&mut data).await?;

    let mut prev_size = [0u8; 4];
    reader.read_exact(&mut prev_size).await?;

    Ok(Some(FlvTag {
        tag_type,
        timestamp,
        data: Bytes::from(data),
    }))
}
