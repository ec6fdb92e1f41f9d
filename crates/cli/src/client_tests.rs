// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use dw_daemon::{Daemon, DaemonConfig};
use tempfile::TempDir;

async fn daemon_in(dir: &TempDir) -> Daemon {
    Daemon::start(DaemonConfig::at(dir.path().join("daemon.sock"))).unwrap()
}

#[tokio::test]
async fn ping_and_info_over_live_socket() {
    let dir = TempDir::new().unwrap();
    let daemon = daemon_in(&dir).await;

    let client = DaemonClient::connect(ClientConfig::at(daemon.socket_path()))
        .await
        .unwrap();
    client.ping().await.unwrap();

    let info = client.info().await.unwrap();
    assert_eq!(info.version, PROTOCOL_VERSION);
    assert_eq!(info.process_info.active, 0);
    assert_eq!(info.client_count, 1);

    client.close().await;
    daemon.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn connect_fails_without_daemon() {
    let dir = TempDir::new().unwrap();
    let err = DaemonClient::connect(ClientConfig::at(dir.path().join("none.sock")))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::DaemonNotRunning));
}

#[tokio::test]
async fn requests_are_serialized_in_issue_order() {
    let dir = TempDir::new().unwrap();
    let daemon = daemon_in(&dir).await;
    let client = std::sync::Arc::new(
        DaemonClient::connect(ClientConfig::at(daemon.socket_path()))
            .await
            .unwrap(),
    );

    let mut handles = Vec::new();
    for _ in 0..8 {
        let client = std::sync::Arc::clone(&client);
        handles.push(tokio::spawn(async move { client.ping().await }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    daemon.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn session_round_trip_through_client() {
    let dir = TempDir::new().unwrap();
    let daemon = daemon_in(&dir).await;
    let client = DaemonClient::connect(ClientConfig::at(daemon.socket_path()))
        .await
        .unwrap();

    let session = client
        .session_register(&RegisterRequest {
            code: None,
            base: None,
            overlay_endpoint: "/tmp/ov.sock".into(),
            directory: dir.path().to_path_buf(),
            command: "claude".into(),
            args: vec![],
        })
        .await
        .unwrap();
    assert_eq!(session.code, "claude-1");

    client.session_heartbeat(&session.code).await.unwrap();
    let sessions = client.session_list(&DirFilter::global()).await.unwrap();
    assert_eq!(sessions.len(), 1);

    let found = client.session_find(&dir.path().join("sub")).await.unwrap();
    assert_eq!(found.code, "claude-1");

    client.session_unregister(&session.code).await.unwrap();
    let err = client.session_get(&session.code).await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::Rejected {
            code: ErrorCode::NotFound,
            ..
        }
    ));

    daemon.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn rejected_error_carries_daemon_code() {
    let dir = TempDir::new().unwrap();
    let daemon = daemon_in(&dir).await;
    let client = DaemonClient::connect(ClientConfig::at(daemon.socket_path()))
        .await
        .unwrap();

    let err = client.proc_status("ghost").await.unwrap_err();
    match err {
        ClientError::Rejected { code, message } => {
            assert_eq!(code, ErrorCode::NotFound);
            assert_eq!(message, "ghost");
        }
        other => panic!("expected Rejected, got {other:?}"),
    }

    daemon.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn version_check_accepts_matching_daemon() {
    let dir = TempDir::new().unwrap();
    let daemon = daemon_in(&dir).await;

    let mut config = ClientConfig::at(daemon.socket_path());
    config.expected_version = Some(PROTOCOL_VERSION.to_string());
    let client = DaemonClient::connect(config).await.unwrap();
    client.check_version().await.unwrap();

    let mut wrong = ClientConfig::at(daemon.socket_path());
    wrong.expected_version = Some("99.0.0".into());
    let err = DaemonClient::connect(wrong).await.unwrap_err();
    assert!(matches!(err, ClientError::VersionMismatch { .. }));

    daemon.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
#[serial_test::serial]
async fn auto_start_surfaces_missing_binary() {
    let dir = TempDir::new().unwrap();
    std::env::set_var("DW_DAEMON_BINARY", "/nonexistent/dwd");

    let mut config = ClientConfig::at(dir.path().join("daemon.sock"));
    config.start_timeout = Duration::from_millis(200);
    let err = DaemonClient::connect_or_start(config).await.unwrap_err();

    std::env::remove_var("DW_DAEMON_BINARY");
    assert!(matches!(err, ClientError::DaemonStartFailed(_)));
}
