// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Terminal session record.
//!
//! A session maps an opaque code to the overlay endpoint of a terminal
//! wrapper running in some project directory. The daemon delivers
//! asynchronous messages to the session through that endpoint.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One registered terminal session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Unique code across the registry, e.g. `claude-2`.
    pub code: String,
    /// Project directory the session is working in.
    pub directory: PathBuf,
    /// Opaque local address (typically a socket path) for async delivery.
    pub overlay_endpoint: String,
    /// Command the session wraps, used as the code base.
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub created_at_ms: u64,
    pub last_heartbeat_ms: u64,
    /// Set once a client has attached to the session via `SESSION ATTACH`.
    #[serde(default)]
    pub attached: bool,
}
