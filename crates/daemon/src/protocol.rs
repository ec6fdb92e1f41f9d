// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Protocol model: commands, responses, error codes, and the verb registry.
//!
//! The wire framing lives in [`crate::codec`]; this module defines what
//! travels inside a frame and the JSON bodies carried as base64 payloads.

use std::collections::HashMap;
use std::path::PathBuf;

use dw_core::{DirFilter, ScheduledTask, Session};
use dw_supervisor::ProcessCounters;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

/// Daemon/client version used by the INFO handshake.
pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("got JSON where a command was expected")]
    JsonInsteadOfCommand,

    #[error("empty command")]
    EmptyCommand,

    #[error("unknown command: {verb}")]
    UnknownCommand {
        verb: String,
        valid: Vec<&'static str>,
    },

    #[error("payload length mismatch: declared {declared}, got {actual}")]
    BadDataLength { declared: usize, actual: usize },

    #[error("invalid payload: {0}")]
    BadData(String),

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("malformed response: {0}")]
    BadResponse(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("timeout")]
    Timeout,
}

/// Structured error kinds carried by ERR responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NotFound,
    AlreadyExists,
    InvalidState,
    ShuttingDown,
    PortInUse,
    InvalidArgs,
    InvalidAction,
    InvalidCommand,
    MissingParam,
    Timeout,
    Internal,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::AlreadyExists => "already_exists",
            Self::InvalidState => "invalid_state",
            Self::ShuttingDown => "shutting_down",
            Self::PortInUse => "port_in_use",
            Self::InvalidArgs => "invalid_args",
            Self::InvalidAction => "invalid_action",
            Self::InvalidCommand => "invalid_command",
            Self::MissingParam => "missing_param",
            Self::Timeout => "timeout",
            Self::Internal => "internal",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "not_found" => Some(Self::NotFound),
            "already_exists" => Some(Self::AlreadyExists),
            "invalid_state" => Some(Self::InvalidState),
            "shutting_down" => Some(Self::ShuttingDown),
            "port_in_use" => Some(Self::PortInUse),
            "invalid_args" => Some(Self::InvalidArgs),
            "invalid_action" => Some(Self::InvalidAction),
            "invalid_command" => Some(Self::InvalidCommand),
            "missing_param" => Some(Self::MissingParam),
            "timeout" => Some(Self::Timeout),
            "internal" => Some(Self::Internal),
            _ => None,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A verb the daemon accepts, with its known sub-verbs.
pub struct VerbSpec {
    pub name: &'static str,
    pub subs: &'static [&'static str],
    /// Framed and registered here but handled by an external collaborator.
    pub external: bool,
}

/// The verb registry. Parsing consults this table; unknown verbs fail with
/// the full valid set so clients can surface a structured error.
pub const VERBS: &[VerbSpec] = &[
    VerbSpec { name: "PING", subs: &[], external: false },
    VerbSpec { name: "INFO", subs: &[], external: false },
    VerbSpec { name: "SHUTDOWN", subs: &[], external: false },
    VerbSpec { name: "RUN", subs: &[], external: false },
    VerbSpec { name: "RUN-JSON", subs: &[], external: false },
    VerbSpec {
        name: "PROC",
        subs: &["STATUS", "OUTPUT", "STOP", "LIST", "CLEANUP-PORT"],
        external: false,
    },
    VerbSpec {
        name: "SESSION",
        subs: &[
            "REGISTER",
            "UNREGISTER",
            "HEARTBEAT",
            "LIST",
            "GET",
            "SEND",
            "SCHEDULE",
            "CANCEL",
            "TASKS",
            "FIND",
            "ATTACH",
        ],
        external: false,
    },
    // Dispatched to external collaborators; the core owns only the framing.
    VerbSpec { name: "PROXY", subs: &[], external: true },
    VerbSpec { name: "TUNNEL", subs: &[], external: true },
    VerbSpec { name: "CHAOS", subs: &[], external: true },
    VerbSpec { name: "OVERLAY", subs: &[], external: true },
    VerbSpec { name: "DETECT", subs: &[], external: true },
    VerbSpec { name: "STORE", subs: &[], external: true },
    VerbSpec { name: "AUTOMATE", subs: &[], external: true },
];

pub fn lookup_verb(name: &str) -> Option<&'static VerbSpec> {
    VERBS.iter().find(|v| v.name == name)
}

pub fn verb_names() -> Vec<&'static str> {
    VERBS.iter().map(|v| v.name).collect()
}

/// A parsed command: `VERB [SUB] [ARG]* [-- payload]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub verb: String,
    pub sub: Option<String>,
    pub args: Vec<String>,
    pub data: Option<Vec<u8>>,
}

impl Command {
    pub fn new(verb: impl Into<String>) -> Self {
        Self {
            verb: verb.into(),
            sub: None,
            args: Vec::new(),
            data: None,
        }
    }

    pub fn with_sub(mut self, sub: impl Into<String>) -> Self {
        self.sub = Some(sub.into());
        self
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn with_json<T: Serialize>(self, body: &T) -> Result<Self, ProtocolError> {
        let data = serde_json::to_vec(body)?;
        Ok(self.with_data(data))
    }

    /// Decode the base64 payload as a JSON body.
    pub fn json_data<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        let data = self.data.as_deref().unwrap_or(b"{}");
        Ok(serde_json::from_slice(data)?)
    }

    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }
}

/// One response frame. A command produces a finite response sequence
/// terminated by exactly one of Ok, Err, Json, Data, End, or Pong;
/// Chunk frames may precede the End of a raw run.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Ok {
        message: Option<String>,
    },
    Err {
        code: ErrorCode,
        message: String,
        /// Optional structured fields (command, action, valid-actions, …).
        detail: Option<serde_json::Value>,
    },
    Json {
        body: serde_json::Value,
    },
    Data {
        bytes: Vec<u8>,
    },
    Chunk {
        bytes: Vec<u8>,
    },
    End,
    Pong,
}

impl Response {
    pub fn ok() -> Self {
        Self::Ok { message: None }
    }

    pub fn ok_msg(message: impl Into<String>) -> Self {
        Self::Ok {
            message: Some(message.into()),
        }
    }

    pub fn err(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Err {
            code,
            message: message.into(),
            detail: None,
        }
    }

    pub fn err_detail(
        code: ErrorCode,
        message: impl Into<String>,
        detail: serde_json::Value,
    ) -> Self {
        Self::Err {
            code,
            message: message.into(),
            detail: Some(detail),
        }
    }

    pub fn json<T: Serialize>(body: &T) -> Result<Self, ProtocolError> {
        Ok(Self::Json {
            body: serde_json::to_value(body)?,
        })
    }

    /// Whether this frame terminates the response sequence for a command.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Chunk { .. })
    }
}

// ---------------------------------------------------------------------------
// JSON bodies
// ---------------------------------------------------------------------------

/// Execution mode for RUN-JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RunMode {
    #[default]
    #[serde(rename = "background")]
    Background,
    #[serde(rename = "foreground")]
    Foreground,
    #[serde(rename = "foreground-raw")]
    ForegroundRaw,
}

/// Body of RUN-JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    pub id: String,
    /// Working directory; half of the process identity.
    pub path: PathBuf,
    #[serde(default)]
    pub mode: RunMode,
    /// Run `npm run <script_name>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_name: Option<String>,
    /// Run a raw shell line via `sh -c`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<Vec<(String, String)>>,
    /// Reuse an existing healthy process with the same `(id, path)` instead
    /// of failing with already_exists; enables port-conflict auto-retry.
    #[serde(default)]
    pub reuse: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffer_size: Option<usize>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

/// JSON result of RUN / RUN-JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub id: String,
    pub directory: PathBuf,
    pub state: String,
    pub pid: Option<u32>,
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub reused: bool,
    #[serde(default)]
    pub cleaned: bool,
    #[serde(default)]
    pub port_retried: bool,
    #[serde(default)]
    pub ports_cleared: Vec<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_error: Option<String>,
}

/// Output stream selector for PROC OUTPUT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Stdout,
    Stderr,
    #[default]
    Combined,
}

/// Body of PROC OUTPUT.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputRequest {
    #[serde(default)]
    pub stream: StreamKind,
    /// Keep only the last N lines.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tail: Option<usize>,
    /// Keep only the first N lines.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head: Option<usize>,
    /// Keep only lines containing this substring.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grep: Option<String>,
    /// Drop lines containing this substring.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grep_v: Option<String>,
    /// Directory disambiguator for the composite key; scan by id when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
}

/// JSON result of PROC OUTPUT.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputResponse {
    pub id: String,
    pub stream: StreamKind,
    pub output: String,
    pub truncated: bool,
}

/// Body of PROC LIST and SESSION LIST/TASKS: the shared directory filter.
pub type ListRequest = DirFilter;

/// INFO response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfoResponse {
    pub version: String,
    pub socket_path: PathBuf,
    pub uptime_seconds: u64,
    pub client_count: usize,
    pub process_info: ProcessCounters,
}

/// Body of SESSION REGISTER.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegisterRequest {
    /// Explicit code; generated from `base` (or the command basename) when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,
    pub overlay_endpoint: String,
    pub directory: PathBuf,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Bodies that address a session by code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeRequest {
    pub code: String,
}

/// Body of SESSION SEND.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendRequest {
    pub code: String,
    pub message: String,
}

/// Body of SESSION SCHEDULE.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRequest {
    pub session_code: String,
    /// Human-readable positive duration, e.g. `5m` or `200ms`.
    pub duration: String,
    pub message: String,
}

/// JSON result of SESSION SCHEDULE.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleResponse {
    pub task_id: String,
    pub fire_at_ms: u64,
}

/// Body of SESSION CANCEL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelRequest {
    pub task_id: String,
}

/// Body of SESSION FIND / ATTACH.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindRequest {
    pub directory: PathBuf,
}

/// JSON result of SESSION LIST.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionList {
    pub sessions: Vec<Session>,
}

/// JSON result of SESSION TASKS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskList {
    pub tasks: Vec<ScheduledTask>,
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
