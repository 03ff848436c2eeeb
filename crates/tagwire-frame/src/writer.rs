use std::io::{ErrorKind, Write};

use bytes::BytesMut;
use tagwire_transport::WireStream;

use crate::codec::{encode_correlated, Frame, FrameConfig, FrameKind, UNCORRELATED};
use crate::error::{FrameError, Result};
use crate::reader::transport_to_frame_error;
use crate::tag::MessageType;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes complete frames to any `Write` stream.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Write> FrameWriter<T> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Write a complete frame (blocking).
    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.send_correlated(frame.kind, frame.correlation, &frame.tag, frame.payload.as_ref())
    }

    /// Encode and send one frame.
    ///
    /// The frame is encoded into a scratch buffer and written in full before
    /// returning, so a frame is never interleaved with another one as long as
    /// the writer itself is not shared without a lock.
    ///
    /// With a write timeout configured, a stalled peer makes this return the
    /// timeout error instead of retrying; the stream may then hold a partial
    /// frame and should be closed.
    pub fn send(&mut self, kind: FrameKind, tag: &MessageType, payload: &[u8]) -> Result<()> {
        self.send_correlated(kind, UNCORRELATED, tag, payload)
    }

    /// Encode and send one frame carrying a correlation value.
    pub fn send_correlated(
        &mut self,
        kind: FrameKind,
        correlation: u32,
        tag: &MessageType,
        payload: &[u8],
    ) -> Result<()> {
        if payload.len() > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.config.max_payload_size,
            });
        }

        self.buf.clear();
        encode_correlated(kind, correlation, tag, payload, &mut self.buf)?;

        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if self.retries(&err) => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }

        self.flush()
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if self.retries(&err) => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    // A blocking socket reports an expired write timeout as `WouldBlock`, so
    // it is only retried when no timeout is configured.
    fn retries(&self, err: &std::io::Error) -> bool {
        err.kind() == ErrorKind::WouldBlock && self.config.write_timeout.is_none()
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Update maximum payload size for subsequent frame encoding.
    pub fn set_max_payload_size(&mut self, max_payload_size: usize) {
        self.config.max_payload_size = max_payload_size;
    }

    /// Current frame writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl FrameWriter<WireStream> {
    /// Create a frame writer for `WireStream` and apply write timeout from config.
    pub fn with_config_stream(inner: WireStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_write_timeout(config.write_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}
