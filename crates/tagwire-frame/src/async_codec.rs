//! `tokio_util` codec speaking the tagwire frame format.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{
    decode_frame, encode_correlated, parse_header, Frame, FrameConfig, HEADER_SIZE,
};
use crate::error::{FrameError, Result};

/// Frame codec for `FramedRead` / `FramedWrite`.
#[derive(Debug, Clone)]
pub struct TagCodec {
    max_payload_size: usize,
}

impl TagCodec {
    pub fn new() -> Self {
        Self::with_config(&FrameConfig::default())
    }

    pub fn with_config(config: &FrameConfig) -> Self {
        Self {
            max_payload_size: config.max_payload_size,
        }
    }
}

impl Default for TagCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for TagCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        decode_frame(src, self.max_payload_size)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => {
                let expected = if src.len() < HEADER_SIZE {
                    HEADER_SIZE
                } else {
                    let header = parse_header(&src[..HEADER_SIZE], self.max_payload_size)?;
                    HEADER_SIZE + header.tag_len + header.payload_len
                };
                Err(FrameError::Truncated {
                    expected,
                    received: src.len(),
                })
            }
        }
    }
}

impl Encoder<Frame> for TagCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        if frame.payload.len() > self.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: frame.payload.len(),
                max: self.max_payload_size,
            });
        }
        encode_correlated(frame.kind, frame.correlation, &frame.tag, &frame.payload, dst)
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{SinkExt, StreamExt};
    use tokio_util::codec::{FramedRead, FramedWrite};

    use super::*;
    use crate::tag::MessageType;

    fn tag(s: &str) -> MessageType {
        MessageType::new(s).unwrap()
    }

    #[tokio::test]
    async fn frames_cross_a_duplex_pipe() {
        let (client, server) = tokio::io::duplex(1024);
        let mut sink = FramedWrite::new(client, TagCodec::new());
        let mut stream = FramedRead::new(server, TagCodec::new());

        sink.send(Frame::request(tag("CUSTOM"), "Hello")).await.unwrap();
        sink.send(Frame::response(tag("CHECK"), "").with_correlation(7))
            .await
            .unwrap();
        drop(sink);

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.tag, "CUSTOM");
        assert_eq!(first.payload.as_ref(), b"Hello");

        let second = stream.next().await.unwrap().unwrap();
        assert!(second.is_response());
        assert_eq!(second.correlation, 7);
        assert!(second.payload.is_empty());

        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn oversized_frames_are_rejected_on_encode() {
        let (client, _server) = tokio::io::duplex(64);
        let cfg = FrameConfig {
            max_payload_size: 2,
            ..FrameConfig::default()
        };
        let mut sink = FramedWrite::new(client, TagCodec::with_config(&cfg));

        let err = sink
            .send(Frame::request(tag("BIG"), "too long"))
            .await
            .unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { .. }));
    }

    #[test]
    fn eof_inside_frame_is_truncated() {
        let mut codec = TagCodec::new();
        let mut buf = BytesMut::from(&[0x54, 0x57, 0x00][..]);
        let err = codec.decode_eof(&mut buf).unwrap_err();
        assert!(matches!(err, FrameError::Truncated { received: 3, .. }));
    }
}
