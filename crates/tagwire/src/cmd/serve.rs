use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tagwire_frame::FrameConfig;
use tagwire_peer::{ConnectionConfig, HandlerResult, Server, ServerConfig, TypeRegistry};

use crate::cmd::ServeArgs;
use crate::exit::{connection_error, CliError, CliResult, INTERNAL, SUCCESS, USAGE};
use crate::output::OutputFormat;

const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

pub fn run(args: ServeArgs, _format: OutputFormat) -> CliResult<i32> {
    if args.max_connections == Some(0) {
        return Err(CliError::new(USAGE, "--max-connections must be at least 1"));
    }

    let registry = demo_registry().map_err(|err| connection_error("register failed", err))?;
    let config = ServerConfig {
        connection: ConnectionConfig {
            frame: FrameConfig {
                max_payload_size: args.max_payload,
                ..FrameConfig::default()
            },
            report_errors_to_peer: !args.no_error_reports,
            ..ConnectionConfig::default()
        },
        max_connections: args.max_connections,
        ..ServerConfig::default()
    };

    let server = Server::new(Arc::new(registry)).with_config(config);
    let addr = server
        .open(&args.host, args.port)
        .map_err(|err| connection_error("bind failed", err))?;

    // Scripts and tests read the bound address from the first stdout line.
    let mut stdout = std::io::stdout();
    let _ = writeln!(stdout, "{addr}");
    let _ = stdout.flush();

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    while running.load(Ordering::SeqCst) {
        thread::sleep(SHUTDOWN_POLL);
    }

    tracing::info!(connections = server.connection_count(), "shutting down");
    server.close();
    Ok(SUCCESS)
}

/// Built-ins plus the demo `ECHO` and `DATA` handlers.
fn demo_registry() -> Result<TypeRegistry, tagwire_peer::ConnectionError> {
    let registry = TypeRegistry::new();
    registry.register_fn("ECHO", echo)?;
    registry.register_fn("DATA", data)?;
    Ok(registry)
}

fn echo(payload: &[u8]) -> HandlerResult {
    Ok(Some(Bytes::copy_from_slice(payload)))
}

/// First four bytes are a big-endian counter that is incremented; the rest
/// is echoed unchanged.
fn data(payload: &[u8]) -> HandlerResult {
    let Some((counter, rest)) = payload.split_first_chunk::<4>() else {
        return Err(format!("DATA needs at least 4 bytes, got {}", payload.len()).into());
    };
    let number = u32::from_be_bytes(*counter);
    let next = number.checked_add(1).ok_or("DATA counter overflow")?;
    tracing::info!(number, text = %String::from_utf8_lossy(rest), "DATA received");

    let mut reply = BytesMut::with_capacity(payload.len());
    reply.put_u32(next);
    reply.put_slice(rest);
    Ok(Some(reply.freeze()))
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
