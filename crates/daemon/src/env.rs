// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Environment variable accessors for daemon tuning.
//!
//! Everything here has a sane default; the variables exist for tests and
//! unusual deployments. `DW_LOG` (an `EnvFilter` directive) controls log
//! verbosity and is read directly by the logging setup in `main`.

use std::time::Duration;

/// Maximum concurrent client connections (`DW_MAX_CLIENTS`, default 64).
pub fn max_clients() -> usize {
    std::env::var("DW_MAX_CLIENTS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(64)
}

/// Health sweep period (`DW_SWEEP_MS`); `Some(0ms)` disables the sweep.
pub fn sweep_interval() -> Option<Duration> {
    std::env::var("DW_SWEEP_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
}

/// Whether the last client disconnecting stops all managed processes
/// (`DW_STOP_ON_LAST_DISCONNECT`, default off).
pub fn stop_on_last_disconnect() -> bool {
    std::env::var("DW_STOP_ON_LAST_DISCONNECT")
        .map(|s| s == "1" || s.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}
