// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Listener task for handling socket I/O.
//!
//! The accept loop spawns one handler per connection. Each handler reads
//! framed commands, dispatches them, and writes the response sequence. A
//! malformed request produces `ERR invalid_command` (resyncing the codec
//! when the bytes never framed) and the connection survives; IO errors and
//! write timeouts close it.

mod proc;
mod sessions;

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dw_supervisor::ProcessManager;
use thiserror::Error;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::codec::{self, Decoder, DEFAULT_TIMEOUT};
use crate::protocol::{
    lookup_verb, verb_names, Command, ErrorCode, InfoResponse, ProtocolError, Response,
    PROTOCOL_VERSION,
};
use crate::registry::SessionRegistry;
use crate::scheduler::TaskScheduler;

/// Per-response write timeout; a stalled client gets disconnected.
const WRITE_TIMEOUT: Duration = DEFAULT_TIMEOUT;

/// Soft deadline for stopping everything when the last client departs.
const LAST_CLIENT_STOP_DEADLINE: Duration = Duration::from_secs(10);

/// Handler hook for verbs owned by external collaborators (PROXY, TUNNEL, …).
pub type ExternalDispatch =
    Arc<dyn Fn(Command) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync>;

/// Shared daemon context for all request handlers.
pub struct ListenCtx {
    pub manager: Arc<ProcessManager>,
    pub registry: Arc<SessionRegistry>,
    pub scheduler: Arc<TaskScheduler>,
    pub socket_path: PathBuf,
    pub start_time: Instant,
    /// Notified when a client requests SHUTDOWN.
    pub shutdown_requested: Arc<Notify>,
    /// Cancelled once the daemon begins tearing down.
    pub shutdown_token: CancellationToken,
    /// Set when SHUTDOWN was received; only PING and INFO are served after.
    pub draining: AtomicBool,
    pub max_clients: usize,
    pub stop_on_last_disconnect: bool,
    client_count: AtomicUsize,
    /// Dispatch for externally-owned verbs; absent means they are refused.
    pub external: Option<ExternalDispatch>,
}

impl ListenCtx {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        manager: Arc<ProcessManager>,
        registry: Arc<SessionRegistry>,
        scheduler: Arc<TaskScheduler>,
        socket_path: PathBuf,
        shutdown_requested: Arc<Notify>,
        shutdown_token: CancellationToken,
        max_clients: usize,
        stop_on_last_disconnect: bool,
    ) -> Self {
        Self {
            manager,
            registry,
            scheduler,
            socket_path,
            start_time: Instant::now(),
            shutdown_requested,
            shutdown_token,
            draining: AtomicBool::new(false),
            max_clients,
            stop_on_last_disconnect,
            client_count: AtomicUsize::new(0),
            external: None,
        }
    }

    pub fn client_count(&self) -> usize {
        self.client_count.load(Ordering::SeqCst)
    }

    fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }
}

/// Errors from connection handling.
#[derive(Debug, Error)]
pub(crate) enum ConnectionError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Listener task for accepting socket connections.
pub struct Listener {
    socket: UnixListener,
    ctx: Arc<ListenCtx>,
}

impl Listener {
    pub fn new(socket: UnixListener, ctx: Arc<ListenCtx>) -> Self {
        Self { socket, ctx }
    }

    /// Run the accept loop until shutdown, spawning a task per connection.
    pub async fn run(self) {
        loop {
            tokio::select! {
                _ = self.ctx.shutdown_token.cancelled() => break,
                accepted = self.socket.accept() => match accepted {
                    Ok((stream, _)) => {
                        let ctx = Arc::clone(&self.ctx);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, &ctx).await {
                                match e {
                                    ConnectionError::Protocol(ProtocolError::ConnectionClosed) => {
                                        debug!("client disconnected")
                                    }
                                    ConnectionError::Protocol(ProtocolError::Timeout) => {
                                        warn!("connection write timeout")
                                    }
                                    _ => error!("connection error: {}", e),
                                }
                            }
                        });
                    }
                    Err(e) => error!("accept error: {}", e),
                },
            }
        }
        debug!("listener stopped");
    }
}

/// Tracks a connected client; the drop side applies the last-client policy.
struct ClientGuard {
    ctx: Arc<ListenCtx>,
}

impl ClientGuard {
    fn connect(ctx: &Arc<ListenCtx>) -> (Self, usize) {
        let count = ctx.client_count.fetch_add(1, Ordering::SeqCst) + 1;
        (
            Self {
                ctx: Arc::clone(ctx),
            },
            count,
        )
    }
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        let remaining = self.ctx.client_count.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining == 0
            && self.ctx.stop_on_last_disconnect
            && !self.ctx.manager.is_shutting_down()
        {
            info!("last client disconnected, stopping managed processes");
            let manager = Arc::clone(&self.ctx.manager);
            tokio::spawn(async move {
                manager.stop_all(LAST_CLIENT_STOP_DEADLINE).await;
            });
        }
    }
}

/// Handle a single client connection until it closes or errors.
async fn handle_connection(stream: UnixStream, ctx: &Arc<ListenCtx>) -> Result<(), ConnectionError> {
    let (guard, count) = ClientGuard::connect(ctx);
    let (mut reader, mut writer) = stream.into_split();
    let mut decoder = Decoder::new();

    if count > ctx.max_clients {
        warn!(count, max = ctx.max_clients, "refusing client over connection cap");
        let refusal = Response::err(ErrorCode::ShuttingDown, "client limit reached");
        codec::write_response(&mut writer, &refusal, WRITE_TIMEOUT).await?;
        drop(guard);
        return Ok(());
    }

    loop {
        let frame = tokio::select! {
            _ = ctx.shutdown_token.cancelled() => break,
            frame = read_frame_unbounded(&mut reader, &mut decoder) => frame,
        };

        let responses = match frame {
            Ok(frame) => match codec::parse_command(&frame) {
                // A complete frame was consumed, so the stream is already
                // positioned past its terminator; no resync needed.
                Ok(cmd) => dispatch(cmd, ctx).await,
                Err(e) => vec![parse_error_response(e)],
            },
            Err(ProtocolError::ConnectionClosed) => break,
            Err(e @ (ProtocolError::JsonInsteadOfCommand | ProtocolError::FrameTooLarge { .. })) => {
                // The offending bytes never framed; discard through the next
                // terminator before resuming.
                decoder.resync();
                vec![parse_error_response(e)]
            }
            Err(e) => return Err(e.into()),
        };

        for response in responses {
            codec::write_response(&mut writer, &response, WRITE_TIMEOUT).await?;
        }
    }

    drop(guard);
    Ok(())
}

/// Read one frame without an idle timeout; clients keep connections open.
async fn read_frame_unbounded(
    reader: &mut (impl tokio::io::AsyncRead + Unpin),
    decoder: &mut Decoder,
) -> Result<String, ProtocolError> {
    use tokio::io::AsyncReadExt;
    loop {
        if let Some(frame) = decoder.next_frame()? {
            return Ok(frame);
        }
        let mut chunk = [0u8; 4096];
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Err(ProtocolError::ConnectionClosed);
        }
        decoder.push(&chunk[..n]);
    }
}

/// Map a codec error onto the ERR response that keeps the connection alive.
fn parse_error_response(error: ProtocolError) -> Response {
    match error {
        ProtocolError::UnknownCommand { verb, valid } => Response::err_detail(
            ErrorCode::InvalidCommand,
            verb.clone(),
            serde_json::json!({ "command": verb, "valid": valid }),
        ),
        other => Response::err(ErrorCode::InvalidCommand, other.to_string()),
    }
}

/// Dispatch one command to its handler, producing the response sequence.
async fn dispatch(cmd: Command, ctx: &Arc<ListenCtx>) -> Vec<Response> {
    let verb = cmd.verb.clone();
    if verb == "PING" {
        return vec![Response::Pong];
    }
    if verb == "INFO" {
        return vec![info_response(ctx)];
    }

    // PING and INFO stay idempotent during drain; everything else is refused.
    if ctx.is_draining() {
        return vec![Response::err(ErrorCode::ShuttingDown, "daemon is shutting down")];
    }

    match verb.as_str() {
        "SHUTDOWN" => {
            info!("shutdown requested by client");
            ctx.draining.store(true, Ordering::SeqCst);
            ctx.shutdown_requested.notify_one();
            vec![Response::ok()]
        }
        "RUN" => vec![proc::handle_run_args(ctx, &cmd).await],
        "RUN-JSON" => proc::handle_run_json(ctx, &cmd).await,
        "PROC" => vec![proc::handle_proc(ctx, &cmd).await],
        "SESSION" => vec![sessions::handle_session(ctx, &cmd).await],
        other => match (&ctx.external, lookup_verb(other)) {
            (Some(external), Some(spec)) if spec.external => vec![external(cmd).await],
            (None, Some(spec)) if spec.external => vec![Response::err(
                ErrorCode::InvalidAction,
                format!("{other} has no registered collaborator"),
            )],
            _ => vec![Response::err_detail(
                ErrorCode::InvalidCommand,
                other.to_string(),
                serde_json::json!({ "command": other, "valid": verb_names() }),
            )],
        },
    }
}

fn info_response(ctx: &ListenCtx) -> Response {
    let info = InfoResponse {
        version: PROTOCOL_VERSION.to_string(),
        socket_path: ctx.socket_path.clone(),
        uptime_seconds: ctx.start_time.elapsed().as_secs(),
        client_count: ctx.client_count(),
        process_info: ctx.manager.counters(),
    };
    Response::json(&info)
        .unwrap_or_else(|e| Response::err(ErrorCode::Internal, e.to_string()))
}

/// ERR invalid_action carrying the valid sub-verbs for a compound verb.
fn invalid_action(verb: &str, got: Option<&str>) -> Response {
    let valid: &[&str] = lookup_verb(verb).map(|s| s.subs).unwrap_or(&[]);
    Response::err_detail(
        ErrorCode::InvalidAction,
        got.map(|g| format!("{verb} {g}")).unwrap_or_else(|| verb.to_string()),
        serde_json::json!({ "command": verb, "action": got, "valid-actions": valid }),
    )
}

#[cfg(test)]
#[path = "../listener_tests.rs"]
mod tests;
