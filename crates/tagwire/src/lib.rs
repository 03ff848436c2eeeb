//! Type-tagged message framing with handler dispatch over stream sockets.
//!
//! Peers exchange frames carrying a message-type tag and a payload. Each side
//! keeps a registry from tag to handler; a connection reads frames on its own
//! thread, runs the matching handler, and writes back whatever it returns.
//!
//! # Crate Structure
//!
//! - [`transport`]: Connected byte streams and TCP bind/accept/connect
//! - [`frame`]: The wire format: tags, frames, blocking reader/writer, async codec
//! - [`peer`]: Type registry, connections, server and client roles (behind `peer` feature)

/// Re-export transport types.
pub mod transport {
    pub use tagwire_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use tagwire_frame::*;
}

/// Re-export peer types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use tagwire_peer::*;
}
