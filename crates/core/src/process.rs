// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process identity, spawn configuration, and the lifecycle state machine.
//!
//! A managed process is identified by the composite key `(id, directory)`:
//! two processes may share an id as long as they live in different
//! directories. State moves strictly forward through the lifecycle graph and
//! every transition is guarded by a compare-and-swap in the supervisor.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default per-stream output capture capacity (256 KiB).
pub const DEFAULT_BUFFER_SIZE: usize = 256 * 1024;

/// Lifecycle state of a managed process.
///
/// Allowed transitions:
/// `Pending -> Starting -> Running -> Stopping -> Stopped`, with `Failed`
/// reachable from `Starting`, `Running`, and `Stopping`, and a rollback edge
/// `Starting -> Pending` used when registration collides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    Pending = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
    Stopped = 4,
    Failed = 5,
}

impl ProcessState {
    /// Decode a state previously stored as its `u8` discriminant.
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Pending),
            1 => Some(Self::Starting),
            2 => Some(Self::Running),
            3 => Some(Self::Stopping),
            4 => Some(Self::Stopped),
            5 => Some(Self::Failed),
            _ => None,
        }
    }

    /// Terminal states never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }

    /// Whether the lifecycle graph allows `self -> next`.
    pub fn can_transition(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Starting)
                | (Self::Starting, Self::Pending)
                | (Self::Starting, Self::Running)
                | (Self::Starting, Self::Failed)
                | (Self::Running, Self::Stopping)
                | (Self::Running, Self::Stopped)
                | (Self::Running, Self::Failed)
                | (Self::Stopping, Self::Stopped)
                | (Self::Stopping, Self::Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Composite registry key: `(id, directory)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessKey {
    pub id: String,
    pub directory: PathBuf,
}

impl ProcessKey {
    pub fn new(id: impl Into<String>, directory: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            directory: directory.into(),
        }
    }
}

impl fmt::Display for ProcessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.directory.display())
    }
}

/// Everything needed to spawn a managed process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSpec {
    pub id: String,
    pub directory: PathBuf,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Explicit environment; `None` inherits the daemon's environment.
    #[serde(default)]
    pub env: Option<Vec<(String, String)>>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

impl ProcessSpec {
    pub fn new(
        id: impl Into<String>,
        directory: impl Into<PathBuf>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            directory: directory.into(),
            command: command.into(),
            args: Vec::new(),
            env: None,
            labels: HashMap::new(),
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn key(&self) -> ProcessKey {
        ProcessKey::new(self.id.clone(), self.directory.clone())
    }
}

#[cfg(test)]
#[path = "process_tests.rs"]
mod tests;
