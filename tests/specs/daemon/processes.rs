//! Process supervision specs: run, capture, duplicate ids, stop.

use crate::prelude::*;
use dw_daemon::{Command, ErrorCode, Response};

fn run_body(id: &str, dir: &std::path::Path, mode: &str, command: &str, args: &[&str]) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "path": dir,
        "mode": mode,
        "command": command,
        "args": args,
    })
}

#[tokio::test]
async fn echo_and_capture() {
    let daemon = TestDaemon::start();
    let mut client = RawClient::connect(&daemon).await;

    let run = Command::new("RUN-JSON")
        .with_json(&run_body("t1", &daemon.workdir(), "foreground", "echo", &["hello", "world"]))
        .unwrap();
    let result = json_of(client.send(&run).await);
    assert_eq!(result["state"], "stopped");
    assert_eq!(result["exit_code"], 0);

    let output_cmd = Command::new("PROC")
        .with_sub("OUTPUT")
        .with_args(["t1"])
        .with_json(&serde_json::json!({"stream": "stdout"}))
        .unwrap();
    let output = json_of(client.send(&output_cmd).await);
    assert_eq!(output["output"], "hello world\n");
    assert_eq!(output["truncated"], false);

    let status = json_of(
        client
            .send(&Command::new("PROC").with_sub("STATUS").with_args(["t1"]))
            .await,
    );
    assert_eq!(status["state"], "stopped");
    assert_eq!(status["exit_code"], 0);

    daemon.stop().await;
}

#[tokio::test]
async fn duplicate_id_is_rejected() {
    let daemon = TestDaemon::start();
    let mut client = RawClient::connect(&daemon).await;

    let run = Command::new("RUN-JSON")
        .with_json(&run_body("dup", &daemon.workdir(), "background", "sleep", &["60"]))
        .unwrap();
    let first = json_of(client.send(&run).await);
    assert!(first["pid"].as_u64().is_some());

    match client.send(&run).await {
        Response::Err { code, message, .. } => {
            assert_eq!(code, ErrorCode::AlreadyExists);
            assert_eq!(message, "dup");
        }
        other => panic!("expected already_exists, got {other:?}"),
    }

    daemon.stop().await;
}

#[tokio::test]
async fn graceful_stop_reaches_terminal_state_quickly() {
    let daemon = TestDaemon::start();
    let mut client = RawClient::connect(&daemon).await;

    let run = Command::new("RUN-JSON")
        .with_json(&run_body("sleeper", &daemon.workdir(), "background", "sleep", &["300"]))
        .unwrap();
    let started = json_of(client.send(&run).await);
    assert_eq!(started["state"], "running");

    let active_before = json_of(client.send(&Command::new("INFO")).await)["process_info"]
        ["active"]
        .as_u64()
        .unwrap();
    assert_eq!(active_before, 1);

    let begun = std::time::Instant::now();
    let stop = Command::new("PROC").with_sub("STOP").with_args(["sleeper"]);
    assert!(matches!(client.send(&stop).await, Response::Ok { .. }));
    assert!(begun.elapsed() < std::time::Duration::from_secs(1));

    let active_after = json_of(client.send(&Command::new("INFO")).await)["process_info"]
        ["active"]
        .as_u64()
        .unwrap();
    assert_eq!(active_after, 0);

    daemon.stop().await;
}

#[tokio::test]
async fn foreground_raw_returns_chunked_output() {
    let daemon = TestDaemon::start();
    let mut client = RawClient::connect(&daemon).await;

    let run = Command::new("RUN-JSON")
        .with_json(&serde_json::json!({
            "id": "raw",
            "path": daemon.workdir(),
            "mode": "foreground-raw",
            "raw": "printf 'line one\n'",
        }))
        .unwrap();
    let responses = client.send_all(&run).await;

    assert_eq!(
        responses,
        vec![
            Response::Chunk {
                bytes: b"line one\n".to_vec()
            },
            Response::End,
        ]
    );

    daemon.stop().await;
}

#[tokio::test]
async fn failed_process_keeps_output_for_inspection() {
    let daemon = TestDaemon::start();
    let mut client = RawClient::connect(&daemon).await;

    let run = Command::new("RUN-JSON")
        .with_json(&serde_json::json!({
            "id": "crash",
            "path": daemon.workdir(),
            "mode": "foreground",
            "raw": "echo boom >&2; exit 3",
        }))
        .unwrap();
    let result = json_of(client.send(&run).await);
    assert_eq!(result["state"], "failed");
    assert_eq!(result["exit_code"], 3);

    let output_cmd = Command::new("PROC")
        .with_sub("OUTPUT")
        .with_args(["crash"])
        .with_json(&serde_json::json!({"stream": "stderr"}))
        .unwrap();
    let output = json_of(client.send(&output_cmd).await);
    assert_eq!(output["output"], "boom\n");

    let info = json_of(client.send(&Command::new("INFO")).await);
    assert_eq!(info["process_info"]["total_failed"], 1);

    daemon.stop().await;
}

#[tokio::test]
async fn output_filters_apply_grep_and_tail() {
    let daemon = TestDaemon::start();
    let mut client = RawClient::connect(&daemon).await;

    let run = Command::new("RUN-JSON")
        .with_json(&serde_json::json!({
            "id": "lines",
            "path": daemon.workdir(),
            "mode": "foreground",
            "raw": "printf 'keep 1\nskip 2\nkeep 3\nkeep 4\n'",
        }))
        .unwrap();
    client.send(&run).await;

    let output_cmd = Command::new("PROC")
        .with_sub("OUTPUT")
        .with_args(["lines"])
        .with_json(&serde_json::json!({"stream": "stdout", "grep": "keep", "tail": 2}))
        .unwrap();
    let output = json_of(client.send(&output_cmd).await);
    assert_eq!(output["output"], "keep 3\nkeep 4\n");

    daemon.stop().await;
}

#[tokio::test]
async fn reuse_returns_the_running_process() {
    let daemon = TestDaemon::start();
    let mut client = RawClient::connect(&daemon).await;

    let body = serde_json::json!({
        "id": "dev",
        "path": daemon.workdir(),
        "mode": "background",
        "command": "sleep",
        "args": ["60"],
        "reuse": true,
    });
    let run = Command::new("RUN-JSON").with_json(&body).unwrap();

    let first = json_of(client.send(&run).await);
    assert_eq!(first["reused"], false);
    let first_pid = first["pid"].as_u64().unwrap();

    let second = json_of(client.send(&run).await);
    assert_eq!(second["reused"], true);
    assert_eq!(second["pid"].as_u64().unwrap(), first_pid);

    daemon.stop().await;
}
