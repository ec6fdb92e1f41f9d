//! Daemon lifecycle specs: socket exclusion, INFO, shutdown drain.

use crate::prelude::*;
use dw_daemon::{Command, DaemonConfig, ErrorCode, Response, SocketError, PROTOCOL_VERSION};

#[tokio::test]
async fn info_reports_version_and_socket() {
    let daemon = TestDaemon::start();
    let mut client = RawClient::connect(&daemon).await;

    let info = json_of(client.send(&Command::new("INFO")).await);
    assert_eq!(info["version"], PROTOCOL_VERSION);
    assert_eq!(
        info["socket_path"],
        daemon.socket_path().display().to_string()
    );
    assert_eq!(info["client_count"], 1);
    assert_eq!(info["process_info"]["active"], 0);
    assert!(info["uptime_seconds"].as_u64().is_some());

    daemon.stop().await;
}

#[tokio::test]
async fn ping_pongs() {
    let daemon = TestDaemon::start();
    let mut client = RawClient::connect(&daemon).await;
    assert_eq!(client.send(&Command::new("PING")).await, Response::Pong);
    daemon.stop().await;
}

#[tokio::test]
async fn second_daemon_cannot_bind_the_same_socket() {
    let daemon = TestDaemon::start();

    let err = dw_daemon::Daemon::start(DaemonConfig::at(daemon.socket_path())).unwrap_err();
    assert!(matches!(err, SocketError::AlreadyRunning(_)));

    daemon.stop().await;
}

#[tokio::test]
async fn socket_and_pidfile_are_removed_on_shutdown() {
    let daemon = TestDaemon::start();
    let socket_path = daemon.socket_path();
    let pid_path = std::path::PathBuf::from(format!("{}.pid", socket_path.display()));

    assert!(socket_path.exists());
    assert!(pid_path.exists());
    let recorded: u32 = std::fs::read_to_string(&pid_path).unwrap().trim().parse().unwrap();
    assert_eq!(recorded, std::process::id());

    daemon.stop().await;
    assert!(!socket_path.exists());
    assert!(!pid_path.exists());
}

#[tokio::test]
async fn shutdown_command_drains_but_answers_ping_and_info() {
    let daemon = TestDaemon::start();
    let mut client = RawClient::connect(&daemon).await;

    assert!(matches!(
        client.send(&Command::new("SHUTDOWN")).await,
        Response::Ok { .. }
    ));

    // Mutating commands are refused during the drain.
    let run = Command::new("RUN-JSON")
        .with_json(&serde_json::json!({
            "id": "late", "path": daemon.workdir(), "command": "true",
        }))
        .unwrap();
    assert!(matches!(
        client.send(&run).await,
        Response::Err {
            code: ErrorCode::ShuttingDown,
            ..
        }
    ));

    // Liveness stays observable.
    assert_eq!(client.send(&Command::new("PING")).await, Response::Pong);
    assert!(matches!(
        client.send(&Command::new("INFO")).await,
        Response::Json { .. }
    ));

    // The daemon signalled the shutdown request to its host.
    tokio::time::timeout(TIMEOUT, daemon.daemon.wait_shutdown_requested())
        .await
        .unwrap();
    daemon.stop().await;
}

#[tokio::test]
async fn shutdown_terminates_managed_processes() {
    let daemon = TestDaemon::start();
    let mut client = RawClient::connect(&daemon).await;

    let run = Command::new("RUN-JSON")
        .with_json(&serde_json::json!({
            "id": "dev",
            "path": daemon.workdir(),
            "command": "sleep",
            "args": ["300"],
        }))
        .unwrap();
    let started = json_of(client.send(&run).await);
    let pid = started["pid"].as_u64().unwrap() as u32;

    daemon.stop().await;

    // The whole process group is gone.
    let alive = std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .status()
        .map(|s| s.success())
        .unwrap_or(false);
    assert!(!alive, "child survived daemon shutdown");
}
