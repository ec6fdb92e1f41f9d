//! Wire protocol specs over a live connection: resync, structured errors.

use crate::prelude::*;
use dw_daemon::{Command, ErrorCode, Response};

#[tokio::test]
async fn malformed_frame_does_not_kill_the_connection() {
    let daemon = TestDaemon::start();
    let mut client = RawClient::connect(&daemon).await;

    assert_eq!(client.send(&Command::new("PING")).await, Response::Pong);

    client.send_raw(b"NO-SUCH-VERB with args;;").await;
    match client.read_response().await {
        Response::Err { code, detail, .. } => {
            assert_eq!(code, ErrorCode::InvalidCommand);
            let detail = detail.unwrap();
            assert_eq!(detail["command"], "NO-SUCH-VERB");
            assert!(detail["valid"]
                .as_array()
                .unwrap()
                .iter()
                .any(|v| v == "RUN-JSON"));
        }
        other => panic!("expected invalid_command, got {other:?}"),
    }

    // The same connection keeps working.
    assert_eq!(client.send(&Command::new("PING")).await, Response::Pong);
    daemon.stop().await;
}

#[tokio::test]
async fn raw_json_input_is_rejected_with_a_structured_error() {
    let daemon = TestDaemon::start();
    let mut client = RawClient::connect(&daemon).await;

    // A misrouted JSON-RPC caller; no terminator ever arrives.
    client.send_raw(br#"{"jsonrpc":"2.0","method":"ping"}"#).await;
    match client.read_response().await {
        Response::Err { code, .. } => assert_eq!(code, ErrorCode::InvalidCommand),
        other => panic!("expected invalid_command, got {other:?}"),
    }

    // Once the stray JSON is terminated, the connection recovers.
    client.send_raw(b";;").await;
    assert_eq!(client.send(&Command::new("PING")).await, Response::Pong);
    daemon.stop().await;
}

#[tokio::test]
async fn pipelined_commands_answer_in_order() {
    let daemon = TestDaemon::start();
    let mut client = RawClient::connect(&daemon).await;

    client.send_raw(b"PING;;INFO;;PING;;").await;
    assert_eq!(client.read_response().await, Response::Pong);
    assert!(matches!(client.read_response().await, Response::Json { .. }));
    assert_eq!(client.read_response().await, Response::Pong);

    daemon.stop().await;
}

#[tokio::test]
async fn compound_verb_with_unknown_action_lists_valid_actions() {
    let daemon = TestDaemon::start();
    let mut client = RawClient::connect(&daemon).await;

    let resp = client.send(&Command::new("SESSION").with_args(["frobnicate"])).await;
    match resp {
        Response::Err { code, detail, .. } => {
            assert_eq!(code, ErrorCode::InvalidAction);
            let detail = detail.unwrap();
            assert_eq!(detail["command"], "SESSION");
            assert_eq!(detail["action"], "frobnicate");
            assert!(detail["valid-actions"]
                .as_array()
                .unwrap()
                .iter()
                .any(|v| v == "REGISTER"));
        }
        other => panic!("expected invalid_action, got {other:?}"),
    }

    daemon.stop().await;
}

#[tokio::test]
async fn payload_length_mismatch_is_recoverable() {
    let daemon = TestDaemon::start();
    let mut client = RawClient::connect(&daemon).await;

    client.send_raw(b"RUN-JSON -- 999\naGVsbG8=;;").await;
    match client.read_response().await {
        Response::Err { code, .. } => assert_eq!(code, ErrorCode::InvalidCommand),
        other => panic!("expected invalid_command, got {other:?}"),
    }

    assert_eq!(client.send(&Command::new("PING")).await, Response::Pong);
    daemon.stop().await;
}

#[tokio::test]
async fn external_verbs_are_framed_but_refused_without_a_collaborator() {
    let daemon = TestDaemon::start();
    let mut client = RawClient::connect(&daemon).await;

    for verb in ["PROXY", "TUNNEL", "CHAOS", "OVERLAY", "DETECT", "STORE", "AUTOMATE"] {
        let resp = client.send(&Command::new(verb).with_args(["anything"])).await;
        assert!(
            matches!(
                resp,
                Response::Err {
                    code: ErrorCode::InvalidAction,
                    ..
                }
            ),
            "{verb} should be refused, got {resp:?}"
        );
    }

    daemon.stop().await;
}
