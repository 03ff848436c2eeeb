//! Type-tagged, length-prefixed message framing.
//!
//! Every message travels as one frame:
//! - A 2-byte magic number ("TW") for stream synchronization
//! - A flags byte marking requests and responses
//! - A 1-byte tag length and a 4-byte little-endian payload length
//! - A 4-byte correlation value pairing responses with requests
//! - The message-type tag, then the payload
//!
//! Payload lengths are checked against a configured maximum before anything
//! is allocated, and a reader never keeps partial-frame state between calls.

#[cfg(feature = "async")]
pub mod async_codec;
pub mod codec;
pub mod error;
pub mod reader;
pub mod tag;
pub mod writer;

#[cfg(feature = "async")]
pub use async_codec::TagCodec;
pub use codec::{
    decode_frame, encode, encode_correlated, encode_frame, Frame, FrameConfig, FrameKind,
    DEFAULT_MAX_PAYLOAD, HEADER_SIZE, MAGIC, UNCORRELATED,
};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use tag::{MessageType, CHECK, ERROR, MAX_TAG_LEN};
pub use writer::FrameWriter;
