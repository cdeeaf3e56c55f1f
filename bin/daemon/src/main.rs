// Copyright (c) ocap-kernel.dev 2025
// This file is licensed under the Apache-2.0 license

use std::sync::Arc;
use std::time::Duration;

use ocap_daemon::launcher::ProcessVatLauncher;
use ocap_daemon::wire::Request;
use ocap_daemon::{paths, Daemon};
use ocap_kernel_engine::Kernel;
use ocap_kernel_store::ServicesRegistry;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

const DISPATCH_TIMEOUT: Duration = Duration::from_secs(30);

fn install_tracing() {
    let filter = EnvFilter::try_from_env("OCAP_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn write_pid_file(path: &std::path::Path) -> std::io::Result<()> {
    std::fs::write(path, std::process::id().to_string())
}

#[tokio::main]
async fn main() {
    install_tracing();

    let socket_path = std::env::var("OCAP_SOCKET").map(std::path::PathBuf::from).unwrap_or_else(|_| paths::default_socket_path());
    let pid_path = std::env::var("OCAP_PID_FILE").map(std::path::PathBuf::from).unwrap_or_else(|_| paths::default_pid_file_path());

    if let Some(parent) = socket_path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            tracing::error!(error = %e, dir = %parent.display(), "failed to create ocap directory");
            std::process::exit(1);
        }
    }
    if socket_path.exists() {
        if let Err(e) = std::fs::remove_file(&socket_path) {
            tracing::error!(error = %e, path = %socket_path.display(), "failed to remove stale socket");
            std::process::exit(1);
        }
    }

    let listener = match UnixListener::bind(&socket_path) {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(error = %e, path = %socket_path.display(), "failed to bind console socket");
            std::process::exit(1);
        }
    };
    if let Err(e) = write_pid_file(&pid_path) {
        tracing::error!(error = %e, path = %pid_path.display(), "failed to write pid file");
        std::process::exit(1);
    }
    tracing::info!(socket = %socket_path.display(), pid_file = %pid_path.display(), "daemon listening");

    let kernel = Arc::new(Kernel::new(DISPATCH_TIMEOUT, ServicesRegistry::default()));
    let daemon = Arc::new(Daemon::new(kernel));
    let (shutdown_tx, mut shutdown_rx) = mpsc::unbounded_channel::<()>();

    let mut exit_code = 0;
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        let daemon = daemon.clone();
                        let shutdown_tx = shutdown_tx.clone();
                        tokio::spawn(async move {
                            serve_connection(stream, daemon, shutdown_tx).await;
                        });
                    }
                    Err(e) => tracing::warn!(error = %e, "failed to accept connection"),
                }
            }
            _ = shutdown_rx.recv() => {
                tracing::info!("shutdown requested, stopping accept loop");
                break;
            }
        }
        if !daemon.kernel().is_healthy() {
            tracing::error!("kernel is unhealthy, shutting down");
            exit_code = 1;
            break;
        }
    }

    let _ = std::fs::remove_file(&socket_path);
    let _ = std::fs::remove_file(&pid_path);
    std::process::exit(exit_code);
}

async fn serve_connection(stream: UnixStream, daemon: Arc<Daemon>, shutdown_tx: mpsc::UnboundedSender<()>) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read request line");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: Request = match serde_json::from_str(&line) {
            Ok(req) => req,
            Err(e) => {
                tracing::warn!(error = %e, "malformed request line, dropping connection");
                break;
            }
        };
        let is_shutdown = req.method == "shutdown";

        let daemon_for_call = daemon.clone();
        let response = tokio::task::spawn_blocking(move || {
            let mut launcher = ProcessVatLauncher;
            daemon_for_call.handle(req, &mut launcher)
        })
        .await
        .expect("daemon dispatch task panicked");

        let mut out = serde_json::to_string(&response).expect("response serializes");
        out.push('\n');
        if let Err(e) = writer.write_all(out.as_bytes()).await {
            tracing::warn!(error = %e, "failed to write response");
            break;
        }

        if is_shutdown {
            let _ = shutdown_tx.send(());
            break;
        }
    }
}
