use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::debug;

use crate::error::{FrameError, Result};
use crate::tag::MessageType;

/// Frame header: magic (2) + flags (1) + tag length (1) + payload length (4)
/// + correlation (4) = 12 bytes.
pub const HEADER_SIZE: usize = 12;

/// Magic bytes: "TW" (0x54 0x57).
pub const MAGIC: [u8; 2] = [0x54, 0x57];

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Correlation value of frames that do not belong to a request/response pair.
pub const UNCORRELATED: u32 = 0;

const FLAG_RESPONSE: u8 = 0x01;

/// Whether a frame asks for handling or answers an earlier frame.
///
/// Responses are dispatched for observation but never answered, so two
/// peers can never bounce replies back and forth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Request,
    Response,
}

impl FrameKind {
    fn flags(self) -> u8 {
        match self {
            FrameKind::Request => 0,
            FrameKind::Response => FLAG_RESPONSE,
        }
    }

    pub(crate) fn from_flags(flags: u8) -> Result<Self> {
        match flags {
            0 => Ok(FrameKind::Request),
            FLAG_RESPONSE => Ok(FrameKind::Response),
            other => Err(FrameError::InvalidFlags(other)),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FrameKind::Request => "request",
            FrameKind::Response => "response",
        }
    }
}

/// A framed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Request or response.
    pub kind: FrameKind,
    /// Pairs a response with the request it answers. A response carries the
    /// value of its request; [`UNCORRELATED`] when nobody waits for a reply.
    pub correlation: u32,
    /// The message type selecting the handler.
    pub tag: MessageType,
    /// The message payload.
    pub payload: Bytes,
}

impl Frame {
    /// Create a request frame.
    pub fn request(tag: MessageType, payload: impl Into<Bytes>) -> Self {
        Self {
            kind: FrameKind::Request,
            correlation: UNCORRELATED,
            tag,
            payload: payload.into(),
        }
    }

    /// Create a response frame.
    pub fn response(tag: MessageType, payload: impl Into<Bytes>) -> Self {
        Self {
            kind: FrameKind::Response,
            correlation: UNCORRELATED,
            tag,
            payload: payload.into(),
        }
    }

    /// Set the correlation value.
    pub fn with_correlation(mut self, correlation: u32) -> Self {
        self.correlation = correlation;
        self
    }

    /// The total wire size of this frame (header + tag + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.tag.as_str().len() + self.payload.len()
    }

    pub fn is_response(&self) -> bool {
        self.kind == FrameKind::Response
    }
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌────────────┬─────────┬─────────┬─────────────┬─────────────┬─────────────┬────────────┐
/// │ Magic (2B) │ Flags   │ Tag len │ Payload len │ Correlation │ Tag         │ Payload    │
/// │ 0x54 0x57  │ (1B)    │ (1B)    │ (4B LE)     │ (4B LE)     │ (Tag len B) │ (Length B) │
/// │ "TW"       │ bit0=rsp│         │             │ 0 = none    │ ASCII       │            │
/// └────────────┴─────────┴─────────┴─────────────┴─────────────┴─────────────┴────────────┘
/// ```
pub fn encode_frame(
    kind: FrameKind,
    tag: &MessageType,
    payload: &[u8],
    dst: &mut BytesMut,
) -> Result<()> {
    encode_correlated(kind, UNCORRELATED, tag, payload, dst)
}

/// Encode a frame carrying a correlation value.
pub fn encode_correlated(
    kind: FrameKind,
    correlation: u32,
    tag: &MessageType,
    payload: &[u8],
    dst: &mut BytesMut,
) -> Result<()> {
    if payload.len() > u32::MAX as usize {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: u32::MAX as usize,
        });
    }
    let tag = tag.as_str().as_bytes();
    dst.reserve(HEADER_SIZE + tag.len() + payload.len());
    dst.put_slice(&MAGIC);
    dst.put_u8(kind.flags());
    // MessageType guarantees 1..=255 bytes.
    dst.put_u8(tag.len() as u8);
    dst.put_u32_le(payload.len() as u32);
    dst.put_u32_le(correlation);
    dst.put_slice(tag);
    dst.put_slice(payload);
    Ok(())
}

/// Encode a request frame into a fresh buffer.
pub fn encode(tag: &MessageType, payload: &[u8]) -> Result<Bytes> {
    let mut dst = BytesMut::new();
    encode_frame(FrameKind::Request, tag, payload, &mut dst)?;
    Ok(dst.freeze())
}

/// Header fields, validated.
pub(crate) struct Header {
    pub kind: FrameKind,
    pub tag_len: usize,
    pub payload_len: usize,
    pub correlation: u32,
}

pub(crate) fn parse_header(header: &[u8], max_payload: usize) -> Result<Header> {
    if header[0..2] != MAGIC {
        return Err(FrameError::InvalidMagic);
    }
    let kind = FrameKind::from_flags(header[2])?;
    let tag_len = header[3] as usize;
    let payload_len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
    let correlation = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);

    if payload_len > max_payload {
        debug!(size = payload_len, max = max_payload, "rejecting oversized frame header");
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    Ok(Header {
        kind,
        tag_len,
        payload_len,
        correlation,
    })
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer. An invalid tag also
/// consumes the frame so the buffer stays aligned on the next one.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>> {
    if src.len() < HEADER_SIZE {
        return Ok(None); // Need more data
    }

    let header = parse_header(&src[..HEADER_SIZE], max_payload)?;

    let total = HEADER_SIZE + header.tag_len + header.payload_len;
    if src.len() < total {
        return Ok(None); // Need more data
    }

    src.advance(HEADER_SIZE);
    let tag = src.split_to(header.tag_len);
    let payload = src.split_to(header.payload_len).freeze();
    let tag = MessageType::from_wire(&tag)?;

    Ok(Some(Frame {
        kind: header.kind,
        correlation: header.correlation,
        tag,
        payload,
    }))
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            read_timeout: None,
            write_timeout: None,
        }
    }
}
