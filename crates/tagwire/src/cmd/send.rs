use std::fs;
use std::sync::Arc;

use tagwire_frame::{Frame, FrameConfig, MessageType};
use tagwire_peer::{Client, ClientConfig, ConnectionConfig, TypeRegistry};

use crate::cmd::{parse_duration, parse_target, SendArgs};
use crate::exit::{connection_error, frame_error, io_error, CliResult, SUCCESS};
use crate::output::{print_frame, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let (host, port) = parse_target(&args.target)?;
    let timeout = parse_duration(&args.timeout)?;
    let tag = MessageType::new(&args.tag).map_err(|err| frame_error("invalid --tag", err))?;
    let payload = resolve_payload(&args)?;

    let config = ClientConfig {
        connection: ConnectionConfig {
            frame: FrameConfig {
                max_payload_size: args.max_payload,
                ..FrameConfig::default()
            },
            // A one-shot sender has nobody to report to.
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

    if args.wait {
        let reply = client
            .request(&tag, &payload)
            .map_err(|err| connection_error("request failed", err))?;
        print_frame(&Frame::response(tag, reply), &args.target, format);
    } else {
        client
            .send_data(&tag, &payload)
            .map_err(|err| connection_error("send failed", err))?;
    }

    client.close();
    Ok(SUCCESS)
}

fn resolve_payload(args: &SendArgs) -> CliResult<Vec<u8>> {
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    if let Some(path) = &args.file {
        return fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err));
    }
    Ok(Vec::new())
}
