use std::sync::Arc;
use std::time::Instant;

use tagwire_frame::CHECK;
use tagwire_peer::{Client, ClientConfig, ConnectionConfig, TypeRegistry};

use crate::cmd::{parse_duration, parse_target, CheckArgs};
use crate::exit::{connection_error, CliResult, FAILURE, SUCCESS};
use crate::output::{print_check, OutputFormat};

pub fn run(args: CheckArgs, format: OutputFormat) -> CliResult<i32> {
    let (host, port) = parse_target(&args.target)?;
    let timeout = parse_duration(&args.timeout)?;

    let config = ClientConfig {
        connection: ConnectionConfig {
            report_errors_to_peer: false,
            ..ConnectionConfig::default()
        },
        connect_timeout: Some(timeout),
        request_timeout: timeout,
    };
    let client = Client::new(Arc::new(TypeRegistry::new())).with_config(config);
    client
        .open(&host, port)
        .map_err(|err| connection_error("connect failed", err))?;

    let started = Instant::now();
    let alive = match client.request(CHECK, b"") {
        Ok(_) => true,
        Err(err) => {
            tracing::warn!(peer = %args.target, error = %err, "CHECK not acknowledged");
            false
        }
    };
    let round_trip_ms = started.elapsed().as_millis();
    client.close();

    print_check(&args.target, alive, round_trip_ms, format);
    Ok(if alive { SUCCESS } else { FAILURE })
}
