// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! dw-daemon: the Dev Warden daemon (dwd).
//!
//! Owns the IPC plane (codec, socket, listener) and the session/overlay
//! coordination (registry, scheduler), wiring them around the process
//! supervisor. The `dwd` binary in `main.rs` is a thin shell over
//! [`lifecycle::Daemon`]; everything here is usable in-process, which is
//! how the workspace specs drive it.

pub mod codec;
pub mod env;
pub mod lifecycle;
pub mod listener;
pub mod overlay;
pub mod protocol;
pub mod registry;
pub mod scheduler;
pub mod socket;

pub use codec::{Decoder, DEFAULT_TIMEOUT, MAX_FRAME_SIZE, TERMINATOR};
pub use lifecycle::{Daemon, DaemonConfig, DaemonLog, STARTUP_MARKER_PREFIX};
pub use protocol::{
    Command, ErrorCode, InfoResponse, OutputRequest, OutputResponse, ProtocolError,
    RegisterRequest, Response, RunMode, RunRequest, RunResult, ScheduleRequest, ScheduleResponse,
    SessionList, StreamKind, TaskList, PROTOCOL_VERSION,
};
pub use registry::{NewSession, RegistryError, SessionRegistry};
pub use scheduler::TaskScheduler;
pub use socket::{default_socket_path, default_state_dir, SocketError, SocketManager};
