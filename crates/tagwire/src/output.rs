use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use tagwire_frame::Frame;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct FrameOutput<'a> {
    tag: &'a str,
    kind: &'a str,
    builtin: bool,
    payload_size: usize,
    payload: String,
    peer: &'a str,
    timestamp: String,
}

pub fn print_frame(frame: &Frame, peer: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = FrameOutput {
                tag: frame.tag.as_str(),
                kind: frame.kind.as_str(),
                builtin: frame.tag.is_builtin(),
                payload_size: frame.payload.len(),
                payload: payload_preview(frame.payload.as_ref()),
                peer,
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["TAG", "KIND", "SIZE", "PEER", "PAYLOAD"])
                .add_row(vec![
                    frame.tag.to_string(),
                    frame.kind.as_str().to_string(),
                    frame.payload.len().to_string(),
                    peer.to_string(),
                    payload_preview(frame.payload.as_ref()),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "tag={} kind={} size={} peer={} payload={}",
                frame.tag,
                frame.kind.as_str(),
                frame.payload.len(),
                peer,
                payload_preview(frame.payload.as_ref())
            );
        }
        OutputFormat::Raw => print_raw(frame.payload.as_ref()),
    }
}

#[derive(Serialize)]
struct CheckOutput<'a> {
    peer: &'a str,
    alive: bool,
    round_trip_ms: u128,
    timestamp: String,
}

pub fn print_check(peer: &str, alive: bool, round_trip_ms: u128, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = CheckOutput {
                peer,
                alive,
                round_trip_ms,
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_header(vec!["PEER", "ALIVE", "RTT (ms)"])
                .add_row(vec![
                    peer.to_string(),
                    alive.to_string(),
                    round_trip_ms.to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            println!("peer={peer} alive={alive} rtt_ms={round_trip_ms}");
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
