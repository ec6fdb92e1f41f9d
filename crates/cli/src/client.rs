// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon client: one connection, framed request/response, auto-start.
//!
//! The connection is held open and a single mutex serializes whole
//! request/response exchanges, so responses arrive in issue order for this
//! client regardless of how many tasks share it.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use dw_core::{DirFilter, ScheduledTask, Session};
use dw_daemon::codec::{self, Decoder};
use dw_daemon::{
    Command, ErrorCode, InfoResponse, OutputRequest, OutputResponse, ProtocolError,
    RegisterRequest, Response, RunRequest, RunResult, ScheduleRequest, ScheduleResponse,
    SessionList, TaskList, PROTOCOL_VERSION,
};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::Mutex;

use crate::daemon_process::{
    cleanup_stale_socket, probe_socket, start_daemon_background, wrap_with_startup_error,
};

/// Client errors
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("daemon not running")]
    DaemonNotRunning,

    #[error("failed to start daemon: {0}")]
    DaemonStartFailed(String),

    #[error("timed out waiting for daemon to start")]
    DaemonStartTimeout,

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("daemon rejected request: {code} {message}")]
    Rejected { code: ErrorCode, message: String },

    #[error("unexpected response from daemon")]
    UnexpectedResponse,

    #[error("daemon version {daemon} does not match client {client}")]
    VersionMismatch { daemon: String, client: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub socket_path: PathBuf,
    /// Expected daemon version; checked strictly when set.
    pub expected_version: Option<String>,
    /// How long to poll-connect after auto-starting the daemon.
    pub start_timeout: Duration,
    pub retry_interval: Duration,
    pub ipc_timeout: Duration,
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self {
            socket_path: dw_daemon::default_socket_path(),
            expected_version: None,
            start_timeout: crate::env::timeout_connect(),
            retry_interval: crate::env::poll_interval(),
            ipc_timeout: crate::env::timeout_ipc(),
        }
    }

    pub fn at(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            ..Self::from_env()
        }
    }
}

struct Conn {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    decoder: Decoder,
}

/// Daemon client holding one socket connection.
pub struct DaemonClient {
    config: ClientConfig,
    conn: Mutex<Conn>,
}

impl std::fmt::Debug for DaemonClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonClient").finish_non_exhaustive()
    }
}

impl DaemonClient {
    /// Connect to a running daemon; no auto-start.
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        let stream = match UnixStream::connect(&config.socket_path).await {
            Ok(stream) => stream,
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused
                ) =>
            {
                return Err(ClientError::DaemonNotRunning);
            }
            Err(e) => return Err(e.into()),
        };

        let (reader, writer) = stream.into_split();
        let client = Self {
            config,
            conn: Mutex::new(Conn {
                reader,
                writer,
                decoder: Decoder::new(),
            }),
        };

        if let Some(expected) = client.config.expected_version.clone() {
            let info = client.info().await?;
            if info.version != expected {
                return Err(ClientError::VersionMismatch {
                    daemon: info.version,
                    client: expected,
                });
            }
        }
        Ok(client)
    }

    /// Connect, auto-starting the daemon when the socket is absent or stale.
    pub async fn connect_or_start(config: ClientConfig) -> Result<Self, ClientError> {
        match Self::connect(config.clone()).await {
            Ok(client) => Ok(client),
            Err(ClientError::DaemonNotRunning) => {
                if config.socket_path.exists() && !probe_socket(&config.socket_path) {
                    cleanup_stale_socket(&config.socket_path);
                }
                let child = start_daemon_background()?;
                Self::connect_with_retry(config, child).await
            }
            Err(e) => Err(wrap_with_startup_error(&config.socket_path, e)),
        }
    }

    async fn connect_with_retry(
        config: ClientConfig,
        mut child: std::process::Child,
    ) -> Result<Self, ClientError> {
        let started = Instant::now();
        while started.elapsed() < config.start_timeout {
            // An early exit means startup failed; surface the log error.
            if let Ok(Some(status)) = child.try_wait() {
                let socket_path = config.socket_path.clone();
                return Err(wrap_with_startup_error(
                    &socket_path,
                    ClientError::DaemonStartFailed(format!("dwd exited with {status}")),
                ));
            }

            match Self::connect(config.clone()).await {
                Ok(client) => return Ok(client),
                Err(ClientError::DaemonNotRunning) => {
                    tokio::time::sleep(config.retry_interval).await;
                }
                Err(e) => return Err(wrap_with_startup_error(&config.socket_path, e)),
            }
        }
        Err(wrap_with_startup_error(
            &config.socket_path,
            ClientError::DaemonStartTimeout,
        ))
    }

    pub fn socket_path(&self) -> &Path {
        &self.config.socket_path
    }

    /// Send one command and collect its full response sequence.
    pub async fn request_all(&self, cmd: &Command) -> Result<Vec<Response>, ClientError> {
        let mut conn = self.conn.lock().await;
        codec::write_command(&mut conn.writer, cmd, self.config.ipc_timeout).await?;

        let mut responses = Vec::new();
        loop {
            let Conn {
                reader, decoder, ..
            } = &mut *conn;
            let response = codec::read_response(reader, decoder, self.config.ipc_timeout).await?;
            let terminal = response.is_terminal();
            responses.push(response);
            if terminal {
                return Ok(responses);
            }
        }
    }

    /// Send one command expecting exactly one terminal response.
    pub async fn request(&self, cmd: &Command) -> Result<Response, ClientError> {
        let mut responses = self.request_all(cmd).await?;
        match responses.len() {
            1 => Ok(responses.remove(0)),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    fn expect_ok(resp: Response) -> Result<(), ClientError> {
        match resp {
            Response::Ok { .. } => Ok(()),
            Response::Err { code, message, .. } => Err(ClientError::Rejected { code, message }),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    fn expect_json<T: DeserializeOwned>(resp: Response) -> Result<T, ClientError> {
        match resp {
            Response::Json { body } => {
                serde_json::from_value(body).map_err(|e| ProtocolError::Json(e).into())
            }
            Response::Err { code, message, .. } => Err(ClientError::Rejected { code, message }),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    // ------------------------------------------------------------------
    // Core verbs
    // ------------------------------------------------------------------

    pub async fn ping(&self) -> Result<(), ClientError> {
        match self.request(&Command::new("PING")).await? {
            Response::Pong => Ok(()),
            Response::Err { code, message, .. } => Err(ClientError::Rejected { code, message }),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    pub async fn info(&self) -> Result<InfoResponse, ClientError> {
        Self::expect_json(self.request(&Command::new("INFO")).await?)
    }

    /// Strict version handshake against this client's build.
    pub async fn check_version(&self) -> Result<InfoResponse, ClientError> {
        let info = self.info().await?;
        if info.version != PROTOCOL_VERSION {
            return Err(ClientError::VersionMismatch {
                daemon: info.version,
                client: PROTOCOL_VERSION.to_string(),
            });
        }
        Ok(info)
    }

    pub async fn shutdown(&self) -> Result<(), ClientError> {
        Self::expect_ok(self.request(&Command::new("SHUTDOWN")).await?)
    }

    pub async fn run_json(&self, req: &RunRequest) -> Result<RunResult, ClientError> {
        let cmd = Command::new("RUN-JSON").with_json(req)?;
        Self::expect_json(self.request(&cmd).await?)
    }

    /// Foreground-raw run: returns the streamed output chunks concatenated.
    pub async fn run_raw(&self, req: &RunRequest) -> Result<Vec<u8>, ClientError> {
        let cmd = Command::new("RUN-JSON").with_json(req)?;
        let responses = self.request_all(&cmd).await?;

        let mut output = Vec::new();
        for response in responses {
            match response {
                Response::Chunk { bytes } => output.extend_from_slice(&bytes),
                Response::End => return Ok(output),
                Response::Err { code, message, .. } => {
                    return Err(ClientError::Rejected { code, message })
                }
                _ => return Err(ClientError::UnexpectedResponse),
            }
        }
        Err(ClientError::UnexpectedResponse)
    }

    // ------------------------------------------------------------------
    // PROC
    // ------------------------------------------------------------------

    pub async fn proc_status(&self, id: &str) -> Result<serde_json::Value, ClientError> {
        let cmd = Command::new("PROC").with_sub("STATUS").with_args([id]);
        Self::expect_json(self.request(&cmd).await?)
    }

    pub async fn proc_output(
        &self,
        id: &str,
        req: &OutputRequest,
    ) -> Result<OutputResponse, ClientError> {
        let cmd = Command::new("PROC")
            .with_sub("OUTPUT")
            .with_args([id])
            .with_json(req)
            ?;
        Self::expect_json(self.request(&cmd).await?)
    }

    pub async fn proc_stop(&self, id: &str, force: bool) -> Result<(), ClientError> {
        let mut cmd = Command::new("PROC").with_sub("STOP").with_args([id]);
        if force {
            cmd.args.push("force".into());
        }
        Self::expect_ok(self.request(&cmd).await?)
    }

    pub async fn proc_list(&self, filter: &DirFilter) -> Result<serde_json::Value, ClientError> {
        let cmd = Command::new("PROC")
            .with_sub("LIST")
            .with_json(filter)
            ?;
        Self::expect_json(self.request(&cmd).await?)
    }

    pub async fn cleanup_port(&self, port: u16) -> Result<Response, ClientError> {
        let cmd = Command::new("PROC")
            .with_sub("CLEANUP-PORT")
            .with_args([port.to_string()]);
        self.request(&cmd).await
    }

    // ------------------------------------------------------------------
    // SESSION
    // ------------------------------------------------------------------

    pub async fn session_register(&self, req: &RegisterRequest) -> Result<Session, ClientError> {
        let cmd = Command::new("SESSION")
            .with_sub("REGISTER")
            .with_json(req)
            ?;
        Self::expect_json(self.request(&cmd).await?)
    }

    pub async fn session_unregister(&self, code: &str) -> Result<(), ClientError> {
        let cmd = Command::new("SESSION").with_sub("UNREGISTER").with_args([code]);
        Self::expect_ok(self.request(&cmd).await?)
    }

    pub async fn session_heartbeat(&self, code: &str) -> Result<(), ClientError> {
        let cmd = Command::new("SESSION").with_sub("HEARTBEAT").with_args([code]);
        Self::expect_ok(self.request(&cmd).await?)
    }

    pub async fn session_list(&self, filter: &DirFilter) -> Result<Vec<Session>, ClientError> {
        let cmd = Command::new("SESSION")
            .with_sub("LIST")
            .with_json(filter)
            ?;
        let list: SessionList = Self::expect_json(self.request(&cmd).await?)?;
        Ok(list.sessions)
    }

    pub async fn session_get(&self, code: &str) -> Result<Session, ClientError> {
        let cmd = Command::new("SESSION").with_sub("GET").with_args([code]);
        Self::expect_json(self.request(&cmd).await?)
    }

    pub async fn session_send(&self, code: &str, message: &str) -> Result<(), ClientError> {
        let body = serde_json::json!({ "code": code, "message": message });
        let cmd = Command::new("SESSION")
            .with_sub("SEND")
            .with_json(&body)
            ?;
        Self::expect_ok(self.request(&cmd).await?)
    }

    pub async fn session_schedule(
        &self,
        req: &ScheduleRequest,
    ) -> Result<ScheduleResponse, ClientError> {
        let cmd = Command::new("SESSION")
            .with_sub("SCHEDULE")
            .with_json(req)
            ?;
        Self::expect_json(self.request(&cmd).await?)
    }

    pub async fn session_cancel(&self, task_id: &str) -> Result<(), ClientError> {
        let cmd = Command::new("SESSION").with_sub("CANCEL").with_args([task_id]);
        Self::expect_ok(self.request(&cmd).await?)
    }

    pub async fn session_tasks(&self, filter: &DirFilter) -> Result<Vec<ScheduledTask>, ClientError> {
        let cmd = Command::new("SESSION")
            .with_sub("TASKS")
            .with_json(filter)
            ?;
        let list: TaskList = Self::expect_json(self.request(&cmd).await?)?;
        Ok(list.tasks)
    }

    pub async fn session_find(&self, directory: &Path) -> Result<Session, ClientError> {
        let body = serde_json::json!({ "directory": directory });
        let cmd = Command::new("SESSION")
            .with_sub("FIND")
            .with_json(&body)
            ?;
        Self::expect_json(self.request(&cmd).await?)
    }

    pub async fn session_attach(&self, directory: &Path) -> Result<Session, ClientError> {
        let body = serde_json::json!({ "directory": directory });
        let cmd = Command::new("SESSION")
            .with_sub("ATTACH")
            .with_json(&body)
            ?;
        Self::expect_json(self.request(&cmd).await?)
    }

    /// Close the connection.
    pub async fn close(self) {
        use tokio::io::AsyncWriteExt;
        let mut conn = self.conn.lock().await;
        let _ = conn.writer.shutdown().await;
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
