// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dev Warden Daemon (dwd)
//!
//! Background process that supervises dev processes and serves the Unix
//! socket IPC plane for `dw` clients. Typically started by the `dw` CLI;
//! exits 0 on clean shutdown, 1 on startup failure, 2 on a fatal runtime
//! error.

use std::time::Duration;

use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};

use dw_daemon::{Daemon, DaemonConfig, DaemonLog, SocketError, PROTOCOL_VERSION};

/// Grace given to managed processes on daemon shutdown.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    if let Some(arg) = std::env::args().nth(1) {
        match arg.as_str() {
            "--version" | "-V" | "-v" => {
                println!("dwd {PROTOCOL_VERSION}");
                return;
            }
            "--help" | "-h" | "help" => {
                println!("dwd {PROTOCOL_VERSION}");
                println!("Dev Warden Daemon - supervises dev processes for dw clients");
                println!();
                println!("USAGE:");
                println!("    dwd");
                println!();
                println!("The daemon is typically started by the `dw` CLI and should not");
                println!("be invoked directly. It listens on a Unix socket for commands");
                println!("from `dw`.");
                println!();
                println!("OPTIONS:");
                println!("    -h, --help       Print help information");
                println!("    -v, --version    Print version information");
                return;
            }
            _ => {
                eprintln!("error: unexpected argument '{arg}'");
                eprintln!("Usage: dwd [--help | --version]");
                std::process::exit(1);
            }
        }
    }

    let log = DaemonLog::new(&dw_daemon::default_state_dir());
    if let Err(e) = log.prepare() {
        eprintln!("error: cannot write daemon log at {}: {e}", log.path().display());
        std::process::exit(1);
    }
    let _log_guard = match log.init_tracing() {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("error: logging setup failed: {e}");
            std::process::exit(1);
        }
    };

    info!(version = PROTOCOL_VERSION, "starting daemon");

    let config = DaemonConfig::from_env();
    let daemon = match Daemon::start(config) {
        Ok(daemon) => daemon,
        Err(SocketError::AlreadyRunning(path)) => {
            let manager = dw_daemon::SocketManager::new(path.clone());
            eprintln!("dwd is already running");
            if let Some(pid) = manager.read_pidfile() {
                eprintln!("  pid: {pid}");
            }
            eprintln!("  socket: {}", path.display());
            std::process::exit(1);
        }
        Err(e) => {
            log.record_startup_failure(&e);
            error!("failed to start daemon: {}", e);
            std::process::exit(1);
        }
    };

    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(term), Ok(int)) => (term, int),
        (Err(e), _) | (_, Err(e)) => {
            error!("failed to install signal handlers: {}", e);
            std::process::exit(2);
        }
    };

    info!(
        "daemon ready, listening on {}",
        daemon.socket_path().display()
    );

    // Signal ready for the parent process (the CLI polling for startup).
    println!("READY");

    tokio::select! {
        _ = daemon.wait_shutdown_requested() => {
            info!("shutdown requested via command");
        }
        _ = sigterm.recv() => {
            info!("received SIGTERM, shutting down");
        }
        _ = sigint.recv() => {
            info!("received SIGINT, shutting down");
        }
    }

    daemon.shutdown(SHUTDOWN_DEADLINE).await;
    info!("daemon stopped");
}
