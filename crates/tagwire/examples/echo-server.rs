//! Minimal echo server: every `ECHO` request is answered with its payload.
//!
//! Run with:
//!   cargo run --example echo-server
//!
//! In another terminal:
//!   cargo run --features cli -- send 127.0.0.1:7878 --tag ECHO --data hello --wait

use std::sync::Arc;

use bytes::Bytes;
use tagwire::peer::{Server, TypeRegistry};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let registry = TypeRegistry::new();
    registry.register_fn("ECHO", |payload| Ok(Some(Bytes::copy_from_slice(payload))))?;

    let server = Server::new(Arc::new(registry));
    let addr = server.open("127.0.0.1", 7878)?;
    eprintln!("Listening on {addr}; press Enter to stop");

    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;

    eprintln!("Closing {} connection(s)", server.connection_count());
    server.close();
    Ok(())
}
