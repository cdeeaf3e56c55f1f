// Copyright (c) ocap-kernel.dev 2025
// This file is licensed under the Apache-2.0 license

//! Default filesystem locations: `~/.ocap/console.sock` and
//! `~/.ocap/daemon.pid`, overridable via `OCAP_SOCKET` / `OCAP_PID_FILE`.

use std::path::PathBuf;

fn ocap_dir() -> PathBuf {
    let home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
    home.join(".ocap")
}

pub fn default_socket_path() -> PathBuf {
    ocap_dir().join("console.sock")
}

pub fn default_pid_file_path() -> PathBuf {
    ocap_dir().join("daemon.pid")
}
