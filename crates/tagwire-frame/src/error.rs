/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame header contains an invalid magic number.
    #[error("invalid frame magic (expected 0x5457 \"TW\")")]
    InvalidMagic,

    /// The flags byte has bits set that this protocol does not define.
    #[error("invalid frame flags 0x{0:02x}")]
    InvalidFlags(u8),

    /// The message-type tag is empty, too long, or not printable ASCII.
    #[error("invalid message type tag: {0}")]
    InvalidTag(String),

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The stream ended part-way through a frame.
    #[error("truncated frame ({received} of {expected} bytes)")]
    Truncated { expected: usize, received: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed on a frame boundary.
    #[error("connection closed")]
    ConnectionClosed,
}

impl FrameError {
    /// True for malformed input, as opposed to the stream itself failing.
    pub fn is_framing(&self) -> bool {
        !matches!(self, FrameError::Io(_) | FrameError::ConnectionClosed)
    }

    /// True when the reader no longer knows where the next frame starts.
    ///
    /// An invalid tag is detected after the whole frame was consumed, so the
    /// stream stays usable. Everything else leaves the read position unknown.
    pub fn desynchronizes_stream(&self) -> bool {
        !matches!(self, FrameError::InvalidTag(_))
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
