// Copyright (c) ocap-kernel.dev 2025
// This file is licensed under the Apache-2.0 license

//! A one-shot JSON-RPC client over the daemon's stream socket:
//! connect, write one line, read one line, disconnect.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use ocap_daemon::wire::{Request, Response};

pub fn call(socket: &Path, method: &str, params: serde_json::Value) -> std::io::Result<Response> {
    let stream = UnixStream::connect(socket)?;
    call_on(stream, method, params)
}

fn call_on(stream: UnixStream, method: &str, params: serde_json::Value) -> std::io::Result<Response> {
    let req = Request { jsonrpc: "2.0".into(), id: Some(serde_json::json!(1)), method: method.to_string(), params };
    let mut line = serde_json::to_string(&req).expect("request serializes");
    line.push('\n');

    let mut writer = stream.try_clone()?;
    writer.write_all(line.as_bytes())?;

    let mut reply = String::new();
    BufReader::new(stream).read_line(&mut reply)?;
    serde_json::from_str(&reply).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

/// `shutdown`'s connect-failure retry: retries once after a 100ms delay.
/// Whether this races a concurrent probe on the same socket is an open
/// question this client does not claim to have settled.
pub fn call_with_retry(socket: &Path, method: &str, params: serde_json::Value) -> std::io::Result<Response> {
    match call(socket, method, params.clone()) {
        Ok(r) => Ok(r),
        Err(_) => {
            thread::sleep(Duration::from_millis(100));
            call(socket, method, params)
        }
    }
}

pub fn is_reachable(socket: &Path) -> bool {
    UnixStream::connect(socket).is_ok()
}

fn poll_until_unreachable(socket: &Path, timeout: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if !is_reachable(socket) {
            return true;
        }
        thread::sleep(Duration::from_millis(100));
    }
    !is_reachable(socket)
}

/// Stop sequence: `shutdown` RPC, poll up to 5s, SIGTERM via
/// pid file, poll up to 5s, SIGKILL, poll up to 2s, else give up.
pub fn stop(socket: &Path, pid_file: &Path) -> Result<(), String> {
    let _ = call_with_retry(socket, "shutdown", serde_json::Value::Null);
    if poll_until_unreachable(socket, Duration::from_secs(5)) {
        return Ok(());
    }

    let Some(pid) = read_pid(pid_file) else {
        return Err("did not stop".into());
    };
    send_signal(pid, "-TERM");
    if poll_until_unreachable(socket, Duration::from_secs(5)) {
        return Ok(());
    }

    send_signal(pid, "-KILL");
    if poll_until_unreachable(socket, Duration::from_secs(2)) {
        return Ok(());
    }

    Err("did not stop".into())
}

fn read_pid(pid_file: &Path) -> Option<u32> {
    std::fs::read_to_string(pid_file).ok()?.trim().parse().ok()
}

fn send_signal(pid: u32, signal: &str) {
    let _ = std::process::Command::new("kill").arg(signal).arg(pid.to_string()).status();
}
