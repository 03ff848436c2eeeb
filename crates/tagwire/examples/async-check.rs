//! Speak the wire format from tokio: send `CHECK` and print the reply.
//!
//! Run with:
//!   cargo run --example async-check --features async -- 127.0.0.1:7878

use futures_util::{SinkExt, StreamExt};
use tagwire::frame::{Frame, MessageType, TagCodec};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let target = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:7878".to_string());

    let stream = TcpStream::connect(&target).await?;
    let mut framed = Framed::new(stream, TagCodec::new());

    framed.send(Frame::request(MessageType::check(), "")).await?;
    match framed.next().await {
        Some(frame) => {
            let frame = frame?;
            println!(
                "{target}: {} {} ({} bytes)",
                frame.kind.as_str(),
                frame.tag,
                frame.payload.len()
            );
        }
        None => println!("{target}: closed without reply"),
    }
    Ok(())
}
