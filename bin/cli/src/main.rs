// Copyright (c) ocap-kernel.dev 2025
// This file is licensed under the Apache-2.0 license

mod capurl;
mod client;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use ocap_daemon::wire::Response;

#[derive(Parser)]
#[command(name = "ocap", about = "Client for the ocap console daemon")]
struct Cli {
    #[arg(long, env = "OCAP_SOCKET")]
    socket: Option<PathBuf>,
    #[arg(long, env = "OCAP_PID_FILE")]
    pid_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// `getStatus`: list vats, subclusters and the run-queue depth.
    Status,
    /// `launchSubcluster`: launch the cluster config read from a JSON file.
    Launch { config: PathBuf },
    /// `terminateSubcluster`.
    Terminate { subcluster_id: String },
    /// `queueMessage`: `target` and `args` slots accept a raw kref, a
    /// `d-<token>`, a `.ocap` file path, or `-` for stdin.
    Send {
        target: String,
        method: String,
        #[arg(long, default_value = "")]
        body: String,
        #[arg(long = "slot")]
        slots: Vec<String>,
    },
    /// `revoke`.
    Revoke { token: String },
    /// `listRefs`.
    Refs,
    /// Runs the daemon's stop sequence.
    Stop,
}

fn main() {
    let cli = Cli::parse();
    let socket = cli.socket.unwrap_or_else(ocap_daemon::paths::default_socket_path);
    let pid_file = cli.pid_file.unwrap_or_else(ocap_daemon::paths::default_pid_file_path);

    let result = match cli.command {
        Command::Status => client::call(&socket, "getStatus", serde_json::Value::Null).map_err(|e| e.to_string()),
        Command::Launch { config } => {
            let text = std::fs::read_to_string(&config).map_err(|e| format!("reading {}: {e}", config.display()));
            text.and_then(|text| serde_json::from_str::<serde_json::Value>(&text).map_err(|e| format!("parsing {}: {e}", config.display())))
                .and_then(|config| client::call(&socket, "launchSubcluster", serde_json::json!({"config": config})).map_err(|e| e.to_string()))
        }
        Command::Terminate { subcluster_id } => {
            client::call(&socket, "terminateSubcluster", serde_json::json!({"subclusterId": subcluster_id})).map_err(|e| e.to_string())
        }
        Command::Send { target, method, body, slots } => resolve_send(&socket, &target, &method, &body, &slots),
        Command::Revoke { token } => client::call(&socket, "revoke", serde_json::json!({"kref": token})).map_err(|e| e.to_string()),
        Command::Refs => client::call(&socket, "listRefs", serde_json::Value::Null).map_err(|e| e.to_string()),
        Command::Stop => {
            match client::stop(&socket, &pid_file) {
                Ok(()) => {
                    println!("stopped");
                    std::process::exit(0);
                }
                Err(msg) => {
                    eprintln!("{msg}");
                    std::process::exit(1);
                }
            }
        }
    };

    match result {
        Ok(response) => print_response(response),
        Err(message) => {
            eprintln!("Error: {message}");
            std::process::exit(1);
        }
    }
}

fn resolve_send(socket: &std::path::Path, target: &str, method: &str, body: &str, slots: &[String]) -> Result<Response, String> {
    let target = capurl::resolve_ref(target).map_err(|e| e.to_string())?;
    let slots = slots.iter().map(|s| capurl::resolve_ref(s)).collect::<std::io::Result<Vec<_>>>().map_err(|e| e.to_string())?;
    let args = serde_json::json!({"body": body, "slots": slots});
    client::call(socket, "queueMessage", serde_json::json!({"target": target, "method": method, "args": args})).map_err(|e| e.to_string())
}

fn print_response(response: Response) {
    if let Some(err) = response.error {
        eprintln!("Error: {} (code {})", err.message, err.code);
        std::process::exit(1);
    }
    let result = response.result.unwrap_or(serde_json::Value::Null);
    println!("{}", serde_json::to_string_pretty(&result).expect("result serializes"));
}
