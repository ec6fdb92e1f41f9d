// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn run_request_minimal_body() {
    let body = r#"{"id":"t1","path":"/tmp","mode":"foreground","command":"echo","args":["hello","world"]}"#;
    let req: RunRequest = serde_json::from_str(body).unwrap();

    assert_eq!(req.id, "t1");
    assert_eq!(req.mode, RunMode::Foreground);
    assert_eq!(req.command.as_deref(), Some("echo"));
    assert_eq!(req.args, vec!["hello", "world"]);
    assert!(!req.reuse);
    assert!(req.env.is_none());
    assert!(req.script_name.is_none());
}

#[test]
fn run_mode_defaults_to_background() {
    let req: RunRequest =
        serde_json::from_str(r#"{"id":"x","path":"/tmp","command":"true"}"#).unwrap();
    assert_eq!(req.mode, RunMode::Background);
}

#[test]
fn run_mode_wire_names() {
    assert_eq!(
        serde_json::to_string(&RunMode::ForegroundRaw).unwrap(),
        "\"foreground-raw\""
    );
    let mode: RunMode = serde_json::from_str("\"background\"").unwrap();
    assert_eq!(mode, RunMode::Background);
}

#[test]
fn output_request_defaults() {
    let req: OutputRequest = serde_json::from_str("{}").unwrap();
    assert_eq!(req.stream, StreamKind::Combined);
    assert!(req.tail.is_none());

    let req: OutputRequest = serde_json::from_str(r#"{"stream":"stdout","tail":20}"#).unwrap();
    assert_eq!(req.stream, StreamKind::Stdout);
    assert_eq!(req.tail, Some(20));
}

#[test]
fn error_code_wire_names_round_trip() {
    for code in [
        ErrorCode::NotFound,
        ErrorCode::AlreadyExists,
        ErrorCode::InvalidState,
        ErrorCode::ShuttingDown,
        ErrorCode::PortInUse,
        ErrorCode::InvalidArgs,
        ErrorCode::InvalidAction,
        ErrorCode::InvalidCommand,
        ErrorCode::MissingParam,
        ErrorCode::Timeout,
        ErrorCode::Internal,
    ] {
        assert_eq!(ErrorCode::parse(code.as_str()), Some(code));
    }
    assert_eq!(ErrorCode::parse("nope"), None);
}

#[test]
fn registry_covers_core_and_external_verbs() {
    for name in ["PING", "INFO", "SHUTDOWN", "RUN", "RUN-JSON", "PROC", "SESSION"] {
        let spec = lookup_verb(name).unwrap();
        assert!(!spec.external, "{name} is a core verb");
    }
    for name in ["PROXY", "TUNNEL", "CHAOS", "OVERLAY", "DETECT", "STORE", "AUTOMATE"] {
        let spec = lookup_verb(name).unwrap();
        assert!(spec.external, "{name} is dispatched externally");
    }
    assert!(lookup_verb("NOPE").is_none());
}

#[test]
fn command_json_body_round_trip() {
    let req = ScheduleRequest {
        session_code: "dev-1".into(),
        duration: "5m".into(),
        message: "wake".into(),
    };
    let cmd = Command::new("SESSION")
        .with_sub("SCHEDULE")
        .with_json(&req)
        .unwrap();
    let back: ScheduleRequest = cmd.json_data().unwrap();
    assert_eq!(back, req);
}

#[test]
fn json_data_of_missing_payload_uses_defaults() {
    let cmd = Command::new("PROC").with_sub("LIST");
    let filter: ListRequest = cmd.json_data().unwrap();
    assert_eq!(filter, dw_core::DirFilter::default());
}

#[test]
fn chunk_is_the_only_non_terminal_response() {
    assert!(!Response::Chunk { bytes: vec![] }.is_terminal());
    for resp in [
        Response::ok(),
        Response::Pong,
        Response::End,
        Response::err(ErrorCode::Internal, "x"),
        Response::Json {
            body: serde_json::json!({}),
        },
        Response::Data { bytes: vec![] },
    ] {
        assert!(resp.is_terminal());
    }
}
