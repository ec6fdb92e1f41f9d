// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Environment accessors for client timeouts and daemon discovery.

use std::time::Duration;

fn parse_duration_ms(var: &str) -> Option<Duration> {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
}

/// Timeout for one IPC request/response exchange.
pub fn timeout_ipc() -> Duration {
    parse_duration_ms("DW_TIMEOUT_IPC_MS").unwrap_or(Duration::from_secs(5))
}

/// Timeout for waiting for an auto-started daemon to accept connections.
pub fn timeout_connect() -> Duration {
    parse_duration_ms("DW_TIMEOUT_CONNECT_MS").unwrap_or(Duration::from_secs(5))
}

/// Polling interval for connection retries.
pub fn poll_interval() -> Duration {
    parse_duration_ms("DW_CONNECT_POLL_MS").unwrap_or(Duration::from_millis(50))
}

/// Explicit daemon binary override.
pub fn daemon_binary() -> Option<String> {
    std::env::var("DW_DAEMON_BINARY").ok()
}
