//! Message dispatch over tagwire connections.
//!
//! A [`TypeRegistry`] maps message-type tags to [`Handler`]s. A [`Connection`]
//! owns one stream, reads frames on its own thread, looks each tag up in the
//! registry, runs the handler, and writes back whatever the handler returns.
//! [`Server`] and [`Client`] wrap connections for the two roles.

pub mod client;
pub mod connection;
pub mod error;
pub mod handler;
pub mod registry;
pub mod server;

pub use client::{Client, ClientConfig};
pub use connection::{Connection, ConnectionConfig, ConnectionState, Role};
pub use error::{ConnectionError, ErrorKind, Result};
pub use handler::{ErrorHook, Handler, HandlerError, HandlerResult, LogErrorHook};
pub use registry::{HandlerEntry, TypeRegistry};
pub use server::{Server, ServerConfig, ANY_HOST};
