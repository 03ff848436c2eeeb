use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use tagwire_frame::DEFAULT_MAX_PAYLOAD;

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod check;
pub mod send;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a server with the built-in and demo handlers.
    Serve(ServeArgs),
    /// Send a single frame.
    Send(SendArgs),
    /// Check that a server answers CHECK.
    Check(CheckArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Check(args) => check::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to bind.
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,
    /// Port to bind. 0 picks a free port; the bound address is printed.
    #[arg(long, short = 'p', default_value_t = 0)]
    pub port: u16,
    /// Refuse connections beyond this many.
    #[arg(long, env = "TAGWIRE_MAX_CONNECTIONS")]
    pub max_connections: Option<usize>,
    /// Largest accepted payload in bytes.
    #[arg(long, env = "TAGWIRE_MAX_PAYLOAD", default_value_t = DEFAULT_MAX_PAYLOAD)]
    pub max_payload: usize,
    /// Keep dispatch errors local instead of answering with ERROR frames.
    #[arg(long)]
    pub no_error_reports: bool,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Server address as HOST:PORT.
    pub target: String,
    /// Message type tag.
    #[arg(long, short = 't')]
    pub tag: String,
    /// Raw string payload.
    #[arg(long, conflicts_with = "file")]
    pub data: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with = "data")]
    pub file: Option<PathBuf>,
    /// Wait for the response frame and print it.
    #[arg(long)]
    pub wait: bool,
    /// Maximum time to wait for the response (e.g. 5s, 500ms).
    #[arg(long, env = "TAGWIRE_REQUEST_TIMEOUT", default_value = "5s")]
    pub timeout: String,
    /// Largest payload to send or accept in bytes.
    #[arg(long, env = "TAGWIRE_MAX_PAYLOAD", default_value_t = DEFAULT_MAX_PAYLOAD)]
    pub max_payload: usize,
}

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Server address as HOST:PORT.
    pub target: String,
    /// Connect and reply timeout (e.g. 5s, 500ms).
    #[arg(long, env = "TAGWIRE_REQUEST_TIMEOUT", default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Split `HOST:PORT`. IPv6 hosts may be bracketed: `[::1]:9000`.
pub fn parse_target(input: &str) -> CliResult<(String, u16)> {
    let (host, port) = input
        .rsplit_once(':')
        .ok_or_else(|| CliError::new(USAGE, format!("expected HOST:PORT, got {input}")))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(CliError::new(USAGE, format!("missing host in {input}")));
    }
    let port = port
        .parse::<u16>()
        .map_err(|_| CliError::new(USAGE, format!("invalid port in {input}")))?;
    Ok((host.to_string(), port))
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
