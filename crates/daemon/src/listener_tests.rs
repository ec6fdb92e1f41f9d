// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::protocol::{OutputResponse, RunResult};
use dw_supervisor::ManagerConfig;
use std::path::Path;
use tempfile::TempDir;

fn test_ctx() -> Arc<ListenCtx> {
    let manager = dw_supervisor::ProcessManager::new(ManagerConfig {
        graceful_timeout: Duration::from_secs(2),
        sweep_interval: Duration::ZERO,
    });
    let shutdown_token = manager.shutdown_token().clone();
    Arc::new(ListenCtx::new(
        manager,
        Arc::new(SessionRegistry::new()),
        Arc::new(TaskScheduler::new()),
        PathBuf::from("/tmp/dw-test.sock"),
        Arc::new(Notify::new()),
        shutdown_token,
        8,
        false,
    ))
}

async fn one(cmd: Command, ctx: &Arc<ListenCtx>) -> Response {
    let mut responses = dispatch(cmd, ctx).await;
    assert_eq!(responses.len(), 1, "expected a single response");
    responses.remove(0)
}

fn json_body(resp: Response) -> serde_json::Value {
    match resp {
        Response::Json { body } => body,
        other => panic!("expected JSON response, got {other:?}"),
    }
}

#[tokio::test]
async fn ping_pongs() {
    let ctx = test_ctx();
    assert_eq!(one(Command::new("PING"), &ctx).await, Response::Pong);
}

#[tokio::test]
async fn info_reports_counters_and_version() {
    let ctx = test_ctx();
    let body = json_body(one(Command::new("INFO"), &ctx).await);

    assert_eq!(body["version"], PROTOCOL_VERSION);
    assert_eq!(body["socket_path"], "/tmp/dw-test.sock");
    assert_eq!(body["process_info"]["active"], 0);
    assert_eq!(body["process_info"]["total_started"], 0);
}

#[tokio::test]
async fn run_json_foreground_then_output() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx();

    let req = serde_json::json!({
        "id": "t1",
        "path": dir.path(),
        "mode": "foreground",
        "command": "echo",
        "args": ["hello", "world"],
    });
    let cmd = Command::new("RUN-JSON").with_json(&req).unwrap();
    let result: RunResult = serde_json::from_value(json_body(one(cmd, &ctx).await)).unwrap();

    assert_eq!(result.id, "t1");
    assert_eq!(result.state, "stopped");
    assert_eq!(result.exit_code, Some(0));

    let output_cmd = Command::new("PROC")
        .with_sub("OUTPUT")
        .with_args(["t1"])
        .with_json(&serde_json::json!({"stream": "stdout"}))
        .unwrap();
    let output: OutputResponse =
        serde_json::from_value(json_body(one(output_cmd, &ctx).await)).unwrap();
    assert_eq!(output.output, "hello world\n");
    assert!(!output.truncated);
}

#[tokio::test]
async fn duplicate_background_run_is_already_exists() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx();

    let req = serde_json::json!({
        "id": "dup",
        "path": dir.path(),
        "mode": "background",
        "command": "sleep",
        "args": ["60"],
    });
    let first = one(
        Command::new("RUN-JSON").with_json(&req).unwrap(),
        &ctx,
    )
    .await;
    let result: RunResult = serde_json::from_value(json_body(first)).unwrap();
    assert!(result.pid.is_some());

    let second = one(
        Command::new("RUN-JSON").with_json(&req).unwrap(),
        &ctx,
    )
    .await;
    match second {
        Response::Err { code, message, .. } => {
            assert_eq!(code, ErrorCode::AlreadyExists);
            assert_eq!(message, "dup");
        }
        other => panic!("expected already_exists, got {other:?}"),
    }

    let stop = Command::new("PROC").with_sub("STOP").with_args(["dup", "force"]);
    assert!(matches!(one(stop, &ctx).await, Response::Ok { .. }));
}

#[tokio::test]
async fn proc_stop_releases_the_record() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx();

    let req = serde_json::json!({
        "id": "sleeper",
        "path": dir.path(),
        "command": "sleep",
        "args": ["300"],
    });
    one(Command::new("RUN-JSON").with_json(&req).unwrap(), &ctx).await;
    assert_eq!(ctx.manager.counters().active, 1);

    let stop = Command::new("PROC").with_sub("STOP").with_args(["sleeper"]);
    assert!(matches!(one(stop, &ctx).await, Response::Ok { .. }));
    assert_eq!(ctx.manager.counters().active, 0);

    let status = Command::new("PROC").with_sub("STATUS").with_args(["sleeper"]);
    assert!(matches!(
        one(status, &ctx).await,
        Response::Err {
            code: ErrorCode::NotFound,
            ..
        }
    ));
}

#[tokio::test]
async fn foreground_raw_streams_chunks_then_end() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx();

    let req = serde_json::json!({
        "id": "raw",
        "path": dir.path(),
        "mode": "foreground-raw",
        "raw": "printf out; printf err >&2",
    });
    let responses = dispatch(Command::new("RUN-JSON").with_json(&req).unwrap(), &ctx).await;

    assert_eq!(
        responses,
        vec![
            Response::Chunk {
                bytes: b"out".to_vec()
            },
            Response::Chunk {
                bytes: b"err".to_vec()
            },
            Response::End,
        ]
    );
}

#[tokio::test]
async fn proc_without_action_lists_valid_actions() {
    let ctx = test_ctx();
    let resp = one(Command::new("PROC").with_args(["bogus"]), &ctx).await;
    match resp {
        Response::Err { code, detail, .. } => {
            assert_eq!(code, ErrorCode::InvalidAction);
            let detail = detail.unwrap();
            assert_eq!(detail["command"], "PROC");
            assert!(detail["valid-actions"]
                .as_array()
                .unwrap()
                .iter()
                .any(|v| v == "STATUS"));
        }
        other => panic!("expected invalid_action, got {other:?}"),
    }
}

#[tokio::test]
async fn external_verbs_without_collaborator_are_refused() {
    let ctx = test_ctx();
    let resp = one(Command::new("TUNNEL").with_args(["up"]), &ctx).await;
    assert!(matches!(
        resp,
        Response::Err {
            code: ErrorCode::InvalidAction,
            ..
        }
    ));
}

#[tokio::test]
async fn shutdown_drains_but_keeps_ping_and_info() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx();

    assert!(matches!(
        one(Command::new("SHUTDOWN"), &ctx).await,
        Response::Ok { .. }
    ));

    // Core verbs are refused while draining.
    let req = serde_json::json!({"id": "x", "path": dir.path(), "command": "true"});
    let refused = one(Command::new("RUN-JSON").with_json(&req).unwrap(), &ctx).await;
    assert!(matches!(
        refused,
        Response::Err {
            code: ErrorCode::ShuttingDown,
            ..
        }
    ));

    // PING and INFO stay idempotent.
    assert_eq!(one(Command::new("PING"), &ctx).await, Response::Pong);
    assert!(matches!(
        one(Command::new("INFO"), &ctx).await,
        Response::Json { .. }
    ));
}

#[tokio::test]
async fn session_register_schedule_and_cancel_flow() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx();

    let register = serde_json::json!({
        "code": "dev-1",
        "overlay_endpoint": dir.path().join("ov.sock"),
        "directory": dir.path(),
    });
    let session = json_body(
        one(
            Command::new("SESSION").with_sub("REGISTER").with_json(&register).unwrap(),
            &ctx,
        )
        .await,
    );
    assert_eq!(session["code"], "dev-1");

    let schedule = serde_json::json!({
        "session_code": "dev-1",
        "duration": "5m",
        "message": "wake",
    });
    let scheduled = json_body(
        one(
            Command::new("SESSION").with_sub("SCHEDULE").with_json(&schedule).unwrap(),
            &ctx,
        )
        .await,
    );
    let task_id = scheduled["task_id"].as_str().unwrap().to_string();

    let tasks = json_body(one(Command::new("SESSION").with_sub("TASKS"), &ctx).await);
    assert_eq!(tasks["tasks"].as_array().unwrap().len(), 1);

    let cancel = one(
        Command::new("SESSION").with_sub("CANCEL").with_args([task_id.as_str()]),
        &ctx,
    )
    .await;
    assert!(matches!(cancel, Response::Ok { .. }));

    let tasks = json_body(one(Command::new("SESSION").with_sub("TASKS"), &ctx).await);
    assert!(tasks["tasks"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn session_schedule_rejects_bad_durations() {
    let dir = TempDir::new().unwrap();
    let ctx = test_ctx();

    let register = serde_json::json!({
        "code": "dev-1",
        "overlay_endpoint": "/tmp/ov.sock",
        "directory": dir.path(),
    });
    one(
        Command::new("SESSION").with_sub("REGISTER").with_json(&register).unwrap(),
        &ctx,
    )
    .await;

    for duration in ["-5m", "0s", "wat"] {
        let schedule = serde_json::json!({
            "session_code": "dev-1",
            "duration": duration,
            "message": "wake",
        });
        let resp = one(
            Command::new("SESSION").with_sub("SCHEDULE").with_json(&schedule).unwrap(),
            &ctx,
        )
        .await;
        assert!(
            matches!(
                resp,
                Response::Err {
                    code: ErrorCode::InvalidArgs,
                    ..
                }
            ),
            "duration {duration:?} should be rejected"
        );
    }
}

#[tokio::test]
async fn connection_loop_survives_malformed_frames() {
    let dir = TempDir::new().unwrap();
    let socket_path = dir.path().join("daemon.sock");
    let listener = tokio::net::UnixListener::bind(&socket_path).unwrap();
    let ctx = test_ctx();

    tokio::spawn(Listener::new(listener, Arc::clone(&ctx)).run());

    let mut stream = tokio::net::UnixStream::connect(&socket_path).await.unwrap();
    let mut decoder = Decoder::new();

    // Valid, malformed, valid again over one connection.
    codec::write_command(&mut stream, &Command::new("PING"), DEFAULT_TIMEOUT)
        .await
        .unwrap();
    let resp = codec::read_response(&mut stream, &mut decoder, DEFAULT_TIMEOUT)
        .await
        .unwrap();
    assert_eq!(resp, Response::Pong);

    use tokio::io::AsyncWriteExt;
    stream.write_all(b"BOGUS-VERB stuff;;").await.unwrap();
    let resp = codec::read_response(&mut stream, &mut decoder, DEFAULT_TIMEOUT)
        .await
        .unwrap();
    match resp {
        Response::Err { code, detail, .. } => {
            assert_eq!(code, ErrorCode::InvalidCommand);
            assert!(detail.unwrap()["valid"].as_array().is_some());
        }
        other => panic!("expected invalid_command, got {other:?}"),
    }

    codec::write_command(&mut stream, &Command::new("PING"), DEFAULT_TIMEOUT)
        .await
        .unwrap();
    let resp = codec::read_response(&mut stream, &mut decoder, DEFAULT_TIMEOUT)
        .await
        .unwrap();
    assert_eq!(resp, Response::Pong);

    assert_eq!(ctx.client_count(), 1);
    drop(stream);
}

#[tokio::test]
async fn client_cap_refuses_excess_connections() {
    let dir = TempDir::new().unwrap();
    let socket_path = dir.path().join("daemon.sock");
    let listener = tokio::net::UnixListener::bind(&socket_path).unwrap();

    let manager = dw_supervisor::ProcessManager::new(ManagerConfig::default());
    let shutdown_token = manager.shutdown_token().clone();
    let ctx = Arc::new(ListenCtx::new(
        manager,
        Arc::new(SessionRegistry::new()),
        Arc::new(TaskScheduler::new()),
        socket_path.clone(),
        Arc::new(Notify::new()),
        shutdown_token,
        1,
        false,
    ));
    tokio::spawn(Listener::new(listener, Arc::clone(&ctx)).run());

    let mut first = tokio::net::UnixStream::connect(&socket_path).await.unwrap();
    let mut first_decoder = Decoder::new();
    codec::write_command(&mut first, &Command::new("PING"), DEFAULT_TIMEOUT)
        .await
        .unwrap();
    assert_eq!(
        codec::read_response(&mut first, &mut first_decoder, DEFAULT_TIMEOUT)
            .await
            .unwrap(),
        Response::Pong
    );

    // Second client is over the cap and refused before its first request.
    let mut second = tokio::net::UnixStream::connect(&socket_path).await.unwrap();
    let mut second_decoder = Decoder::new();
    let resp = codec::read_response(&mut second, &mut second_decoder, DEFAULT_TIMEOUT)
        .await
        .unwrap();
    assert!(matches!(
        resp,
        Response::Err {
            code: ErrorCode::ShuttingDown,
            ..
        }
    ));
}

#[test]
fn session_find_walks_directories() {
    let registry = SessionRegistry::new();
    registry
        .register(crate::registry::NewSession {
            code: Some("root".into()),
            base: None,
            overlay_endpoint: "/tmp/ov.sock".into(),
            directory: PathBuf::from("/proj"),
            command: "claude".into(),
            args: vec![],
        })
        .unwrap();
    assert_eq!(
        registry.find(Path::new("/proj/a/b")).unwrap().code,
        "root"
    );
}
