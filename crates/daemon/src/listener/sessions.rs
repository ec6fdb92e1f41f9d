// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Handlers for the SESSION sub-verbs.

use std::sync::Arc;

use dw_core::{parse_signed_duration, DirFilter};

use crate::listener::{invalid_action, ListenCtx};
use crate::overlay;
use crate::protocol::{
    CancelRequest, CodeRequest, Command, ErrorCode, FindRequest, RegisterRequest, Response,
    ScheduleRequest, ScheduleResponse, SendRequest, SessionList, TaskList,
};
use crate::registry::{NewSession, RegistryError};

pub(super) async fn handle_session(ctx: &Arc<ListenCtx>, cmd: &Command) -> Response {
    match cmd.sub.as_deref() {
        Some("REGISTER") => handle_register(ctx, cmd),
        Some("UNREGISTER") => handle_unregister(ctx, cmd),
        Some("HEARTBEAT") => handle_heartbeat(ctx, cmd),
        Some("LIST") => handle_list(ctx, cmd),
        Some("GET") => handle_get(ctx, cmd),
        Some("SEND") => handle_send(ctx, cmd).await,
        Some("SCHEDULE") => handle_schedule(ctx, cmd),
        Some("CANCEL") => handle_cancel(ctx, cmd),
        Some("TASKS") => handle_tasks(ctx, cmd),
        Some("FIND") => handle_find(ctx, cmd),
        Some("ATTACH") => handle_attach(ctx, cmd),
        _ => invalid_action("SESSION", cmd.arg(0)),
    }
}

fn json_or_internal<T: serde::Serialize>(body: &T) -> Response {
    Response::json(body).unwrap_or_else(|e| Response::err(ErrorCode::Internal, e.to_string()))
}

fn handle_register(ctx: &Arc<ListenCtx>, cmd: &Command) -> Response {
    let req = match cmd.json_data::<RegisterRequest>() {
        Ok(req) => req,
        Err(e) => return Response::err(ErrorCode::InvalidArgs, e.to_string()),
    };
    if req.overlay_endpoint.is_empty() {
        return Response::err_detail(
            ErrorCode::MissingParam,
            "overlay_endpoint is required",
            serde_json::json!({ "param": "overlay_endpoint" }),
        );
    }

    let new = NewSession {
        code: req.code,
        base: req.base,
        overlay_endpoint: req.overlay_endpoint,
        directory: req.directory,
        command: req.command,
        args: req.args,
    };
    match ctx.registry.register(new) {
        Ok(session) => json_or_internal(&session),
        Err(RegistryError::AlreadyExists(code)) => {
            Response::err(ErrorCode::AlreadyExists, code)
        }
        Err(e) => Response::err(ErrorCode::Internal, e.to_string()),
    }
}

/// Code argument: `SESSION GET dev-1` or a `{code}` body.
fn code_of(cmd: &Command) -> Result<String, Response> {
    if let Some(code) = cmd.arg(0) {
        return Ok(code.to_string());
    }
    cmd.json_data::<CodeRequest>()
        .map(|req| req.code)
        .map_err(|_| {
            Response::err_detail(
                ErrorCode::MissingParam,
                "session code is required",
                serde_json::json!({ "param": "code" }),
            )
        })
}

fn handle_unregister(ctx: &Arc<ListenCtx>, cmd: &Command) -> Response {
    match code_of(cmd) {
        // Unregister is idempotent: unknown codes still succeed.
        Ok(code) => {
            ctx.registry.unregister(&code);
            Response::ok()
        }
        Err(resp) => resp,
    }
}

fn handle_heartbeat(ctx: &Arc<ListenCtx>, cmd: &Command) -> Response {
    match code_of(cmd) {
        Ok(code) => match ctx.registry.heartbeat(&code) {
            Ok(()) => Response::ok(),
            Err(RegistryError::NotFound(code)) => Response::err(ErrorCode::NotFound, code),
            Err(e) => Response::err(ErrorCode::Internal, e.to_string()),
        },
        Err(resp) => resp,
    }
}

fn handle_list(ctx: &Arc<ListenCtx>, cmd: &Command) -> Response {
    match cmd.json_data::<DirFilter>() {
        Ok(filter) => json_or_internal(&SessionList {
            sessions: ctx.registry.list(&filter),
        }),
        Err(e) => Response::err(ErrorCode::InvalidArgs, e.to_string()),
    }
}

fn handle_get(ctx: &Arc<ListenCtx>, cmd: &Command) -> Response {
    match code_of(cmd) {
        Ok(code) => match ctx.registry.get(&code) {
            Some(session) => json_or_internal(&session),
            None => Response::err(ErrorCode::NotFound, code),
        },
        Err(resp) => resp,
    }
}

async fn handle_send(ctx: &Arc<ListenCtx>, cmd: &Command) -> Response {
    let req = match cmd.json_data::<SendRequest>() {
        Ok(req) => req,
        Err(e) => return Response::err(ErrorCode::InvalidArgs, e.to_string()),
    };
    let Some(session) = ctx.registry.get(&req.code) else {
        return Response::err(ErrorCode::NotFound, req.code);
    };
    match overlay::deliver(&session.overlay_endpoint, &req.message).await {
        Ok(()) => Response::ok(),
        Err(e) => Response::err(ErrorCode::Internal, e.to_string()),
    }
}

fn handle_schedule(ctx: &Arc<ListenCtx>, cmd: &Command) -> Response {
    let req = match cmd.json_data::<ScheduleRequest>() {
        Ok(req) => req,
        Err(e) => return Response::err(ErrorCode::InvalidArgs, e.to_string()),
    };
    let duration = match parse_signed_duration(&req.duration) {
        Ok(duration) => duration,
        Err(e) => return Response::err(ErrorCode::InvalidArgs, e.to_string()),
    };
    let Some(session) = ctx.registry.get(&req.session_code) else {
        return Response::err(ErrorCode::NotFound, req.session_code);
    };

    let task = ctx.scheduler.schedule(&session, duration, req.message);
    json_or_internal(&ScheduleResponse {
        task_id: task.task_id,
        fire_at_ms: task.fire_at_ms,
    })
}

fn handle_cancel(ctx: &Arc<ListenCtx>, cmd: &Command) -> Response {
    let task_id = match cmd.arg(0) {
        Some(id) => id.to_string(),
        None => match cmd.json_data::<CancelRequest>() {
            Ok(req) => req.task_id,
            Err(e) => return Response::err(ErrorCode::InvalidArgs, e.to_string()),
        },
    };
    if ctx.scheduler.cancel(&task_id) {
        Response::ok()
    } else {
        Response::err(ErrorCode::NotFound, task_id)
    }
}

fn handle_tasks(ctx: &Arc<ListenCtx>, cmd: &Command) -> Response {
    match cmd.json_data::<DirFilter>() {
        Ok(filter) => json_or_internal(&TaskList {
            tasks: ctx.scheduler.tasks(&filter),
        }),
        Err(e) => Response::err(ErrorCode::InvalidArgs, e.to_string()),
    }
}

fn handle_find(ctx: &Arc<ListenCtx>, cmd: &Command) -> Response {
    match cmd.json_data::<FindRequest>() {
        Ok(req) => match ctx.registry.find(&req.directory) {
            Some(session) => json_or_internal(&session),
            None => Response::err(
                ErrorCode::NotFound,
                format!("no session above {}", req.directory.display()),
            ),
        },
        Err(e) => Response::err(ErrorCode::InvalidArgs, e.to_string()),
    }
}

fn handle_attach(ctx: &Arc<ListenCtx>, cmd: &Command) -> Response {
    match cmd.json_data::<FindRequest>() {
        Ok(req) => match ctx.registry.attach(&req.directory) {
            Some(session) => json_or_internal(&session),
            None => Response::err(
                ErrorCode::NotFound,
                format!("no session above {}", req.directory.display()),
            ),
        },
        Err(e) => Response::err(ErrorCode::InvalidArgs, e.to_string()),
    }
}
