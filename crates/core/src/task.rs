// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scheduled message delivery record.
//!
//! Tasks are owned by the scheduler and live only in memory: a daemon
//! restart loses them, giving at-most-once delivery across restarts.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Delivery status of a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Fired,
    Canceled,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Fired => "fired",
            Self::Canceled => "canceled",
        }
    }
}

/// A message queued for delayed delivery to a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub task_id: String,
    pub session_code: String,
    /// Directory of the target session at scheduling time, for scoped listing.
    pub directory: PathBuf,
    pub fire_at_ms: u64,
    pub message: String,
    pub status: TaskStatus,
    /// Best-effort delivery failure, recorded but never retried.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_error: Option<String>,
}
