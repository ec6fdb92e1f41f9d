// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Handlers for RUN, RUN-JSON, and the PROC sub-verbs.

use std::path::PathBuf;
use std::sync::Arc;

use dw_core::{DirFilter, ProcessSpec};
use dw_supervisor::{ManagedProcess, StartOutcome, SupervisorError};
use tokio_util::sync::CancellationToken;

use crate::listener::{invalid_action, ListenCtx};
use crate::protocol::{
    Command, ErrorCode, OutputRequest, OutputResponse, Response, RunMode, RunRequest, RunResult,
    StreamKind,
};
use dw_supervisor::ports;

/// RUN with positional args: `RUN <id> <path> <command> [args…]`.
///
/// Equivalent to a background RUN-JSON with `reuse` off.
pub(super) async fn handle_run_args(ctx: &Arc<ListenCtx>, cmd: &Command) -> Response {
    let (Some(id), Some(path), Some(command)) = (cmd.arg(0), cmd.arg(1), cmd.arg(2)) else {
        return Response::err(ErrorCode::MissingParam, "RUN <id> <path> <command> [args...]");
    };
    let req = RunRequest {
        id: id.to_string(),
        path: PathBuf::from(path),
        mode: RunMode::Background,
        script_name: None,
        raw: None,
        command: Some(command.to_string()),
        args: cmd.args[3..].to_vec(),
        env: None,
        reuse: false,
        buffer_size: None,
        labels: Default::default(),
    };
    run(ctx, req).await.pop().unwrap_or_else(Response::ok)
}

/// RUN-JSON with a full request body.
pub(super) async fn handle_run_json(ctx: &Arc<ListenCtx>, cmd: &Command) -> Vec<Response> {
    match cmd.json_data::<RunRequest>() {
        Ok(req) => run(ctx, req).await,
        Err(e) => vec![Response::err(ErrorCode::InvalidArgs, e.to_string())],
    }
}

async fn run(ctx: &Arc<ListenCtx>, req: RunRequest) -> Vec<Response> {
    let spec = match build_spec(&req) {
        Ok(spec) => spec,
        Err(resp) => return vec![resp],
    };

    let outcome = if req.reuse {
        match ctx
            .manager
            .start_or_reuse(spec, &CancellationToken::new())
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => return vec![supervisor_error(e)],
        }
    } else {
        match ctx.manager.start(spec).await {
            Ok(process) => StartOutcome {
                process,
                reused: false,
                cleaned: false,
                port_retried: false,
                ports_cleared: Vec::new(),
                port_error: None,
            },
            Err(e) => return vec![supervisor_error(e)],
        }
    };

    match req.mode {
        RunMode::Background => vec![run_result(&outcome)],
        RunMode::Foreground => {
            outcome.process.wait_done().await;
            vec![run_result(&outcome)]
        }
        RunMode::ForegroundRaw => {
            outcome.process.wait_done().await;
            let (stdout, _) = outcome.process.stdout();
            let (stderr, _) = outcome.process.stderr();
            let mut responses = Vec::new();
            if !stdout.is_empty() {
                responses.push(Response::Chunk { bytes: stdout });
            }
            if !stderr.is_empty() {
                responses.push(Response::Chunk { bytes: stderr });
            }
            responses.push(Response::End);
            responses
        }
    }
}

/// Resolve the spawn command: `raw` runs through the shell, `script_name`
/// through the package runner, else an explicit command and args.
fn build_spec(req: &RunRequest) -> Result<ProcessSpec, Response> {
    let (command, args) = if let Some(raw) = &req.raw {
        ("sh".to_string(), vec!["-c".to_string(), raw.clone()])
    } else if let Some(script) = &req.script_name {
        (
            "npm".to_string(),
            vec!["run".to_string(), script.clone()],
        )
    } else if let Some(command) = &req.command {
        (command.clone(), req.args.clone())
    } else {
        return Err(Response::err_detail(
            ErrorCode::MissingParam,
            "one of command, raw, or script_name is required",
            serde_json::json!({ "param": "command", "valid-params": ["command", "raw", "script_name"] }),
        ));
    };

    let mut spec = ProcessSpec::new(&req.id, &req.path, command).with_args(args);
    spec.env = req.env.clone();
    spec.labels = req.labels.clone();
    if let Some(size) = req.buffer_size {
        spec.buffer_size = size;
    }
    Ok(spec)
}

fn run_result(outcome: &StartOutcome) -> Response {
    let proc = &outcome.process;
    let result = RunResult {
        id: proc.id().to_string(),
        directory: proc.directory().clone(),
        state: proc.state().to_string(),
        pid: proc.pid(),
        exit_code: proc.exit_code(),
        reused: outcome.reused,
        cleaned: outcome.cleaned,
        port_retried: outcome.port_retried,
        ports_cleared: outcome.ports_cleared.clone(),
        port_error: outcome.port_error.clone(),
    };
    Response::json(&result).unwrap_or_else(|e| Response::err(ErrorCode::Internal, e.to_string()))
}

fn supervisor_error(error: SupervisorError) -> Response {
    match &error {
        SupervisorError::AlreadyExists(key) => {
            Response::err(ErrorCode::AlreadyExists, key.id.clone())
        }
        SupervisorError::NotFound(id) => Response::err(ErrorCode::NotFound, id.clone()),
        SupervisorError::InvalidState { .. } => {
            Response::err(ErrorCode::InvalidState, error.to_string())
        }
        SupervisorError::ShuttingDown => {
            Response::err(ErrorCode::ShuttingDown, error.to_string())
        }
        SupervisorError::Timeout(_) => Response::err(ErrorCode::Timeout, error.to_string()),
        _ => Response::err(ErrorCode::Internal, error.to_string()),
    }
}

/// PROC sub-verb dispatch.
pub(super) async fn handle_proc(ctx: &Arc<ListenCtx>, cmd: &Command) -> Response {
    match cmd.sub.as_deref() {
        Some("STATUS") => handle_status(ctx, cmd),
        Some("OUTPUT") => handle_output(ctx, cmd),
        Some("STOP") => handle_stop(ctx, cmd).await,
        Some("LIST") => handle_list(ctx, cmd),
        Some("CLEANUP-PORT") => handle_cleanup_port(ctx, cmd).await,
        _ => invalid_action("PROC", cmd.arg(0)),
    }
}

/// Look up a process by id, honoring an optional directory disambiguator.
fn lookup(
    ctx: &ListenCtx,
    id: &str,
    directory: Option<&PathBuf>,
) -> Result<Arc<ManagedProcess>, Response> {
    let found = match directory {
        Some(dir) => ctx.manager.get_by_path(id, dir),
        None => ctx.manager.get(id),
    };
    found.ok_or_else(|| Response::err(ErrorCode::NotFound, id))
}

fn handle_status(ctx: &Arc<ListenCtx>, cmd: &Command) -> Response {
    let Some(id) = cmd.arg(0) else {
        return Response::err(ErrorCode::MissingParam, "PROC STATUS <id>");
    };
    let directory = cmd.arg(1).map(PathBuf::from);
    match lookup(ctx, id, directory.as_ref()) {
        Ok(proc) => Response::json(&proc.status())
            .unwrap_or_else(|e| Response::err(ErrorCode::Internal, e.to_string())),
        Err(resp) => resp,
    }
}

fn handle_output(ctx: &Arc<ListenCtx>, cmd: &Command) -> Response {
    let Some(id) = cmd.arg(0) else {
        return Response::err(ErrorCode::MissingParam, "PROC OUTPUT <id>");
    };
    let req = match cmd.json_data::<OutputRequest>() {
        Ok(req) => req,
        Err(e) => return Response::err(ErrorCode::InvalidArgs, e.to_string()),
    };
    let proc = match lookup(ctx, id, req.directory.as_ref()) {
        Ok(proc) => proc,
        Err(resp) => return resp,
    };

    let (bytes, truncated) = match req.stream {
        StreamKind::Stdout => proc.stdout(),
        StreamKind::Stderr => proc.stderr(),
        StreamKind::Combined => proc.combined_output(),
    };
    let output = apply_filters(String::from_utf8_lossy(&bytes).into_owned(), &req);

    let body = OutputResponse {
        id: id.to_string(),
        stream: req.stream,
        output,
        truncated,
    };
    Response::json(&body).unwrap_or_else(|e| Response::err(ErrorCode::Internal, e.to_string()))
}

/// Apply grep/grep_v, then head, then tail, preserving line endings.
fn apply_filters(output: String, req: &OutputRequest) -> String {
    if req.grep.is_none() && req.grep_v.is_none() && req.head.is_none() && req.tail.is_none() {
        return output;
    }

    let mut lines: Vec<&str> = output.lines().collect();
    if let Some(pattern) = &req.grep {
        lines.retain(|line| line.contains(pattern.as_str()));
    }
    if let Some(pattern) = &req.grep_v {
        lines.retain(|line| !line.contains(pattern.as_str()));
    }
    if let Some(head) = req.head {
        lines.truncate(head);
    }
    if let Some(tail) = req.tail {
        if lines.len() > tail {
            lines.drain(..lines.len() - tail);
        }
    }

    let mut filtered = lines.join("\n");
    if !filtered.is_empty() {
        filtered.push('\n');
    }
    filtered
}

async fn handle_stop(ctx: &Arc<ListenCtx>, cmd: &Command) -> Response {
    let Some(id) = cmd.arg(0) else {
        return Response::err(ErrorCode::MissingParam, "PROC STOP <id> [force]");
    };
    let force = cmd.args[1..].iter().any(|a| a.eq_ignore_ascii_case("force"));

    let Some(proc) = ctx.manager.get(id) else {
        return Response::err(ErrorCode::NotFound, id);
    };
    match ctx.manager.stop_process(&proc, force).await {
        Ok(()) => {
            // The record is terminal; release the key.
            ctx.manager.remove(&proc.key());
            Response::ok_msg(format!("{} stopped", proc.id()))
        }
        Err(e) => supervisor_error(e),
    }
}

fn handle_list(ctx: &Arc<ListenCtx>, cmd: &Command) -> Response {
    let filter = match cmd.json_data::<DirFilter>() {
        Ok(filter) => filter,
        Err(e) => return Response::err(ErrorCode::InvalidArgs, e.to_string()),
    };
    let processes: Vec<_> = ctx
        .manager
        .list(&filter)
        .iter()
        .map(|p| p.status())
        .collect();
    Response::json(&serde_json::json!({ "processes": processes }))
        .unwrap_or_else(|e| Response::err(ErrorCode::Internal, e.to_string()))
}

async fn handle_cleanup_port(ctx: &Arc<ListenCtx>, cmd: &Command) -> Response {
    let Some(port) = cmd.arg(0).and_then(|a| a.parse::<u16>().ok()) else {
        return Response::err(ErrorCode::InvalidArgs, "PROC CLEANUP-PORT <port>");
    };

    let blockers = ports::find_port_blockers(port).await;
    if blockers.is_empty() {
        return Response::ok_msg(format!("no listeners on port {port}"));
    }

    if let Some(&managed) = blockers.iter().find(|&&pid| ctx.manager.is_managed_pid(pid)) {
        let holder = ctx
            .manager
            .get_by_pid(managed)
            .map(|p| p.id().to_string())
            .unwrap_or_else(|| "unknown".into());
        return Response::err(
            ErrorCode::PortInUse,
            format!("port {port} is held by managed process {holder} (pid {managed})"),
        );
    }

    let cleared = ports::clear_blockers(&blockers).await;
    Response::json(&serde_json::json!({ "port": port, "cleared": cleared }))
        .unwrap_or_else(|e| Response::err(ErrorCode::Internal, e.to_string()))
}
