#![cfg(all(unix, feature = "cli"))]

use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Stdio};

struct ServeProcess {
    child: Child,
    addr: String,
}

impl ServeProcess {
    fn start(extra: &[&str]) -> Self {
        let mut child = Command::new(env!("CARGO_BIN_EXE_tagwire"))
            .args(["--log-level", "error", "serve", "--host", "127.0.0.1", "--port", "0"])
            .args(extra)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("serve command should start");

        let stdout = child.stdout.take().expect("stdout should be piped");
        let mut line = String::new();
        BufReader::new(stdout)
            .read_line(&mut line)
            .expect("serve should print its address");
        let addr = line.trim().to_string();
        assert!(addr.starts_with("127.0.0.1:"), "unexpected address line: {addr}");

        Self { child, addr }
    }
}

impl Drop for ServeProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn tagwire(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_tagwire"))
        .args(["--log-level", "error"])
        .args(args)
        .output()
        .expect("tagwire should run")
}

#[test]
fn check_against_serve_succeeds() {
    let server = ServeProcess::start(&[]);

    let output = tagwire(&["--format", "json", "check", &server.addr]);
    assert!(output.status.success());

    let report: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("check should emit json");
    assert_eq!(report["alive"], serde_json::Value::Bool(true));
    assert_eq!(report["peer"].as_str(), Some(server.addr.as_str()));
}

#[test]
fn send_wait_prints_echo_reply() {
    let server = ServeProcess::start(&[]);

    let output = tagwire(&[
        "--format", "json", "send", &server.addr, "--tag", "ECHO", "--data", "Hello", "--wait",
    ]);
    assert!(output.status.success());

    let frame: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("send should emit json");
    assert_eq!(frame["tag"].as_str(), Some("ECHO"));
    assert_eq!(frame["kind"].as_str(), Some("response"));
    assert_eq!(frame["payload"].as_str(), Some("Hello"));
}

#[test]
fn send_raw_data_frame_increments_counter() {
    let server = ServeProcess::start(&[]);

    let dir = std::env::temp_dir().join(format!("tagwire-cli-{}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    let path = dir.join("data.bin");
    let mut payload = 7u32.to_be_bytes().to_vec();
    payload.extend_from_slice(b"abc");
    std::fs::write(&path, &payload).expect("payload file should be writable");

    let output = tagwire(&[
        "--format",
        "raw",
        "send",
        &server.addr,
        "--tag",
        "DATA",
        "--file",
        path.to_str().expect("utf-8 path"),
        "--wait",
    ]);
    assert!(output.status.success());

    let mut expected = 8u32.to_be_bytes().to_vec();
    expected.extend_from_slice(b"abc");
    assert_eq!(output.stdout, expected);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn unknown_tag_fails_with_remote_error() {
    let server = ServeProcess::start(&[]);

    let output = tagwire(&["send", &server.addr, "--tag", "MYSTERY", "--wait"]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("MYSTERY"), "stderr: {stderr}");
}

#[test]
fn oversized_send_is_data_invalid() {
    let server = ServeProcess::start(&[]);

    let output = tagwire(&[
        "send",
        &server.addr,
        "--tag",
        "ECHO",
        "--data",
        "too long",
        "--max-payload",
        "4",
    ]);
    assert_eq!(output.status.code(), Some(60));
}

#[test]
fn invalid_tag_is_usage_error() {
    let output = tagwire(&["send", "127.0.0.1:1", "--tag", "has space"]);
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn check_against_closed_port_is_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();
    drop(listener);

    let output = tagwire(&["check", &addr, "--timeout", "1s"]);
    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn version_reports_package_version() {
    let output = tagwire(&["version"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), format!("tagwire {}", env!("CARGO_PKG_VERSION")));
}
