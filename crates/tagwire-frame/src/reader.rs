use std::io::{ErrorKind, Read};

use bytes::BytesMut;
use tagwire_transport::WireStream;

use crate::codec::{parse_header, Frame, FrameConfig, HEADER_SIZE};
use crate::error::{FrameError, Result};
use crate::tag::{MessageType, MAX_TAG_LEN};

/// Reads complete frames from any `Read` stream.
///
/// Each call consumes exactly one frame: the fixed header first, then the tag
/// and payload sized by that header. Nothing is buffered past the frame, so
/// the reader holds no partial-frame state between calls.
pub struct FrameReader<T> {
    inner: T,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self { inner, config }
    }

    /// Read the next complete frame (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached on a
    /// frame boundary and `Err(FrameError::Truncated { .. })` when it is
    /// reached inside one. An oversized length is rejected before any tag or
    /// payload byte is read.
    pub fn read_frame(&mut self) -> Result<Frame> {
        let mut header = [0u8; HEADER_SIZE];
        let got = read_full(&mut self.inner, &mut header)?;
        if got == 0 {
            return Err(FrameError::ConnectionClosed);
        }
        if got < HEADER_SIZE {
            return Err(FrameError::Truncated {
                expected: HEADER_SIZE,
                received: got,
            });
        }

        let header = parse_header(&header, self.config.max_payload_size)?;
        let expected = HEADER_SIZE + header.tag_len + header.payload_len;

        let mut tag = [0u8; MAX_TAG_LEN];
        let tag = &mut tag[..header.tag_len];
        let got = read_full(&mut self.inner, tag)?;
        if got < header.tag_len {
            return Err(FrameError::Truncated {
                expected,
                received: HEADER_SIZE + got,
            });
        }

        let mut payload = BytesMut::zeroed(header.payload_len);
        let got = read_full(&mut self.inner, &mut payload)?;
        if got < header.payload_len {
            return Err(FrameError::Truncated {
                expected,
                received: HEADER_SIZE + header.tag_len + got,
            });
        }

        Ok(Frame {
            kind: header.kind,
            correlation: header.correlation,
            tag: MessageType::from_wire(tag)?,
            payload: payload.freeze(),
        })
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Update maximum payload size for subsequent frame decoding.
    pub fn set_max_payload_size(&mut self, max_payload_size: usize) {
        self.config.max_payload_size = max_payload_size;
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl FrameReader<WireStream> {
    /// Create a frame reader for `WireStream` and apply read timeout from config.
    pub fn with_config_stream(inner: WireStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

/// Fill `buf` until it is full or the stream reports EOF; returns bytes read.
fn read_full<R: Read>(inner: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0usize;
    while filled < buf.len() {
        match inner.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(FrameError::Io(err)),
        }
    }
    Ok(filled)
}

pub(crate) fn transport_to_frame_error(err: tagwire_transport::TransportError) -> FrameError {
    match err {
        tagwire_transport::TransportError::Io(io)
        | tagwire_transport::TransportError::Accept(io) => FrameError::Io(io),
        tagwire_transport::TransportError::Bind { source, .. }
        | tagwire_transport::TransportError::Connect { source, .. } => FrameError::Io(source),
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    use bytes::{BufMut, BytesMut};

    use super::*;
    use crate::codec::{encode_frame, FrameKind, MAGIC};

    fn tag(s: &str) -> MessageType {
        MessageType::new(s).unwrap()
    }

    fn wire(frames: &[(&str, &[u8])]) -> Vec<u8> {
        let mut wire = BytesMut::new();
        for (t, payload) in frames {
            encode_frame(FrameKind::Request, &tag(t), payload, &mut wire).unwrap();
        }
        wire.to_vec()
    }

    #[test]
    fn read_single_frame() {
        let mut reader = FrameReader::new(Cursor::new(wire(&[("CUSTOM", b"hello")])));
        let frame = reader.read_frame().unwrap();

        assert_eq!(frame.tag, "CUSTOM");
        assert_eq!(frame.kind, FrameKind::Request);
        assert_eq!(frame.payload.as_ref(), b"hello");
    }

    #[test]
    fn read_multiple_frames() {
        let bytes = wire(&[("ONE", b"one"), ("TWO", b"two"), ("THREE", b"three")]);
        let mut reader = FrameReader::new(Cursor::new(bytes));

        let f1 = reader.read_frame().unwrap();
        let f2 = reader.read_frame().unwrap();
        let f3 = reader.read_frame().unwrap();

        assert_eq!((f1.tag.as_str(), f1.payload.as_ref()), ("ONE", b"one".as_ref()));
        assert_eq!((f2.tag.as_str(), f2.payload.as_ref()), ("TWO", b"two".as_ref()));
        assert_eq!((f3.tag.as_str(), f3.payload.as_ref()), ("THREE", b"three".as_ref()));
    }

    #[test]
    fn reads_exactly_one_frame_per_call() {
        let bytes = wire(&[("A", b"first"), ("B", b"second")]);
        let first_len = HEADER_SIZE + 1 + 5;
        let mut reader = FrameReader::new(Cursor::new(bytes));

        reader.read_frame().unwrap();
        assert_eq!(reader.get_ref().position() as usize, first_len);
    }

    #[test]
    fn read_frame_with_large_payload() {
        let payload = vec![0xAB; 64 * 1024];
        let mut reader = FrameReader::new(Cursor::new(wire(&[("BULK", &payload)])));
        let frame = reader.read_frame().unwrap();

        assert_eq!(frame.tag, "BULK");
        assert_eq!(frame.payload.as_ref(), payload.as_slice());
    }

    #[test]
    fn partial_read_handling() {
        let byte_reader = ByteByByteReader {
            bytes: wire(&[("SLOW", b"slow")]),
            pos: 0,
        };
        let mut reader = FrameReader::new(byte_reader);

        let frame = reader.read_frame().unwrap();
        assert_eq!(frame.tag, "SLOW");
        assert_eq!(frame.payload.as_ref(), b"slow");
    }

    #[test]
    fn connection_closed_cleanly() {
        let mut reader = FrameReader::new(Cursor::new(Vec::<u8>::new()));
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
        assert!(!err.is_framing());
    }

    #[test]
    fn connection_closed_mid_header() {
        let mut reader = FrameReader::new(Cursor::new(vec![0x54, 0x57, 0x00]));
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(
            err,
            FrameError::Truncated {
                expected: HEADER_SIZE,
                received: 3
            }
        ));
        assert!(err.is_framing());
    }

    #[test]
    fn connection_closed_mid_payload() {
        let mut partial = BytesMut::new();
        partial.put_slice(&MAGIC);
        partial.put_u8(0);
        partial.put_u8(4);
        partial.put_u32_le(16);
        partial.put_u32_le(0);
        partial.put_slice(b"DATA");
        partial.put_slice(b"only-part");

        let mut reader = FrameReader::new(Cursor::new(partial.to_vec()));
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(
            err,
            FrameError::Truncated {
                expected: 32,
                received: 25
            }
        ));
    }

    #[test]
    fn invalid_magic_in_stream() {
        let mut bytes = vec![0x00, 0x01, 0x00, 0x01];
        bytes.extend_from_slice(&[0u8; 8]);
        bytes.push(b'A');
        let mut reader = FrameReader::new(Cursor::new(bytes));
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::InvalidMagic));
        assert!(err.desynchronizes_stream());
    }

    #[test]
    fn oversized_frame_is_rejected_before_reading_body() {
        let mut wire = BytesMut::new();
        wire.put_slice(&MAGIC);
        wire.put_u8(0);
        wire.put_u8(4);
        wire.put_u32_le(u32::MAX);
        wire.put_u32_le(0);
        wire.put_slice(b"HUGE");

        let cfg = FrameConfig {
            max_payload_size: 16,
            ..FrameConfig::default()
        };
        let mut reader = FrameReader::with_config(Cursor::new(wire.to_vec()), cfg);
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size, max: 16 } if size == u32::MAX as usize));
        // Only the header was consumed; the tag bytes are still unread.
        assert_eq!(reader.get_ref().position() as usize, HEADER_SIZE);
    }

    #[test]
    fn invalid_tag_keeps_stream_aligned() {
        let mut bytes = BytesMut::new();
        bytes.put_slice(&MAGIC);
        bytes.put_u8(0);
        bytes.put_u8(3);
        bytes.put_u32_le(2);
        bytes.put_u32_le(0);
        bytes.put_slice(b"A B");
        bytes.put_slice(b"xx");
        encode_frame(FrameKind::Request, &tag("OK"), b"fine", &mut bytes).unwrap();

        let mut reader = FrameReader::new(Cursor::new(bytes.to_vec()));
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::InvalidTag(_)));

        let frame = reader.read_frame().unwrap();
        assert_eq!(frame.tag, "OK");
        assert_eq!(frame.payload.as_ref(), b"fine");
    }

    #[derive(Debug)]
    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() {
                return Ok(0);
            }
            if buf.is_empty() {
                return Ok(0);
            }

            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    #[test]
    #[cfg(unix)]
    fn roundtrip_over_pipe() {
        let (left, right) = WireStream::pair().unwrap();
        let mut writer = crate::writer::FrameWriter::new(left);
        let mut reader = FrameReader::new(right);

        writer.send(FrameKind::Request, &tag("PING"), b"ping").unwrap();
        let frame = reader.read_frame().unwrap();

        assert_eq!(frame.tag, "PING");
        assert_eq!(frame.payload.as_ref(), b"ping");
    }

    #[test]
    #[cfg(unix)]
    fn concurrent_reader_writer_threads() {
        let (left, right) = WireStream::pair().unwrap();
        let mut writer = crate::writer::FrameWriter::new(left);
        let reader = FrameReader::new(right);
        let reader = Arc::new(Mutex::new(reader));

        let reader_thread = {
            let reader = Arc::clone(&reader);
            std::thread::spawn(move || {
                for expected in 0..64u16 {
                    let frame = reader.lock().unwrap().read_frame().unwrap();
                    assert_eq!(frame.tag.as_str(), format!("T{}", expected % 5));
                    assert_eq!(frame.payload.as_ref(), format!("msg-{expected}").as_bytes());
                }
            })
        };

        for i in 0..64u16 {
            let payload = format!("msg-{i}");
            writer
                .send(FrameKind::Request, &tag(&format!("T{}", i % 5)), payload.as_bytes())
                .unwrap();
        }

        reader_thread.join().unwrap();
    }

    #[test]
    fn accessors_and_into_inner() {
        let cursor = Cursor::new(Vec::<u8>::new());
        let mut reader = FrameReader::new(cursor);

        let _ = reader.get_ref();
        let _ = reader.get_mut();
        reader.set_max_payload_size(8);
        assert_eq!(reader.config().max_payload_size, 8);
        let _inner = reader.into_inner();
    }

    #[test]
    fn read_would_block_propagates_io_error() {
        let reader = WouldBlockThenData {
            state: 0,
            bytes: wire(&[("OK", b"ok")]),
            pos: 0,
        };
        let mut framed = FrameReader::new(reader);
        let err = framed.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::Io(e) if e.kind() == ErrorKind::WouldBlock));
    }

    struct WouldBlockThenData {
        state: u8,
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for WouldBlockThenData {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.state == 0 {
                self.state = 1;
                return Err(std::io::Error::from(ErrorKind::WouldBlock));
            }
            if self.pos >= self.bytes.len() {
                return Ok(0);
            }
            let remaining = self.bytes.len() - self.pos;
            let n = remaining.min(buf.len());
            buf[..n].copy_from_slice(&self.bytes[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    #[test]
    fn interrupted_read_retries() {
        let reader = InterruptedThenData {
            state: 0,
            bytes: wire(&[("RETRY", b"ok")]),
            pos: 0,
        };
        let mut framed = FrameReader::new(reader);
        let frame = framed.read_frame().unwrap();

        assert_eq!(frame.tag, "RETRY");
        assert_eq!(frame.payload.as_ref(), b"ok");
    }

    struct InterruptedThenData {
        state: u8,
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for InterruptedThenData {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.state == 0 {
                self.state = 1;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            if self.pos >= self.bytes.len() {
                return Ok(0);
            }
            let remaining = self.bytes.len() - self.pos;
            let n = remaining.min(buf.len());
            buf[..n].copy_from_slice(&self.bytes[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    #[test]
    #[cfg(unix)]
    fn applies_read_timeout_for_wire_stream() {
        let (left, _right) = WireStream::pair().unwrap();

        let cfg = FrameConfig {
            read_timeout: Some(std::time::Duration::from_millis(10)),
            ..FrameConfig::default()
        };

        let mut reader = FrameReader::with_config_stream(left, cfg).unwrap();
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(
            err,
            FrameError::Io(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
        ));
    }
}
