//! Byte-stream transports for tagwire.
//!
//! Everything above this crate only sees a [`WireStream`]: a connected,
//! bidirectional byte stream that can be cloned into independent read and
//! write halves and shut down from any thread. How the stream was obtained
//! (TCP accept/connect here, a Unix socket pair in tests) does not matter to
//! the framing and connection layers.

pub mod error;
pub mod stream;
pub mod tcp;

pub use error::{Result, TransportError};
pub use stream::WireStream;
pub use tcp::TcpTransport;
