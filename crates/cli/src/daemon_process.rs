// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon process management utilities.
//!
//! Finding, spawning, and probing the `dwd` daemon from the client side.
//! The daemon is started detached in its own process group so it survives
//! the CLI exiting.

use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::client::ClientError;

/// Locate the `dwd` binary: explicit override, then a sibling of the
/// current executable, then `$PATH`.
pub fn find_daemon_binary() -> PathBuf {
    if let Some(path) = crate::env::daemon_binary() {
        return PathBuf::from(path);
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let sibling = dir.join("dwd");
            if sibling.exists() {
                return sibling;
            }
        }
    }

    PathBuf::from("dwd")
}

/// Start the daemon in the background, returning the child handle so the
/// caller can watch for an early startup failure.
pub fn start_daemon_background() -> Result<std::process::Child, ClientError> {
    let dwd = find_daemon_binary();

    Command::new(&dwd)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .process_group(0)
        .spawn()
        .map_err(|e| ClientError::DaemonStartFailed(format!("{}: {e}", dwd.display())))
}

/// Probe whether a Unix socket is accepting connections.
pub fn probe_socket(socket_path: &Path) -> bool {
    std::os::unix::net::UnixStream::connect(socket_path).is_ok()
}

/// Get the owner pid recorded next to the socket, if any.
pub fn read_daemon_pid(socket_path: &Path) -> Option<u32> {
    let pid_path = pidfile_path(socket_path);
    std::fs::read_to_string(pid_path).ok()?.trim().parse().ok()
}

fn pidfile_path(socket_path: &Path) -> PathBuf {
    PathBuf::from(format!("{}.pid", socket_path.display()))
}

/// Check if a process with the given PID exists.
pub fn process_exists(pid: u32) -> bool {
    kill_signal("-0", pid)
}

fn kill_signal(signal: &str, pid: u32) -> bool {
    Command::new("kill")
        .args([signal, &pid.to_string()])
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Remove stale socket and pid files when the recorded owner is dead.
///
/// Called when the socket file exists but nothing is accepting on it.
pub fn cleanup_stale_socket(socket_path: &Path) {
    let pid_path = pidfile_path(socket_path);
    match read_daemon_pid(socket_path) {
        Some(pid) if process_exists(pid) => {
            // Owner is alive; leave its files alone.
        }
        _ => {
            let _ = std::fs::remove_file(socket_path);
            let _ = std::fs::remove_file(&pid_path);
        }
    }
}

/// Read the daemon log from the latest startup marker, looking for errors.
///
/// The marker format is shared with the daemon through
/// [`dw_daemon::STARTUP_MARKER_PREFIX`].
pub fn read_startup_error(socket_path: &Path) -> Option<String> {
    let log_path = socket_path.parent()?.join("daemon.log");
    let content = std::fs::read_to_string(log_path).ok()?;
    parse_startup_error(&content)
}

/// Parse startup errors from log content (pure logic, no I/O).
fn parse_startup_error(content: &str) -> Option<String> {
    let start_pos = content.rfind(dw_daemon::STARTUP_MARKER_PREFIX)?;
    let startup_log = &content[start_pos..];

    let errors: Vec<&str> = startup_log
        .lines()
        .filter(|line| line.contains("ERROR") || line.contains("startup failed"))
        .collect();

    if errors.is_empty() {
        return None;
    }

    let messages: Vec<String> = errors
        .iter()
        .filter_map(|line| line.split_once(": ").map(|(_, msg)| msg.to_string()))
        .collect();

    if messages.is_empty() {
        Some(errors.join("\n"))
    } else {
        Some(messages.join("\n"))
    }
}

/// Replace a bland connect failure with the daemon's own startup error
/// when the log has one.
pub fn wrap_with_startup_error(socket_path: &Path, err: ClientError) -> ClientError {
    if matches!(err, ClientError::DaemonStartFailed(_)) {
        return err;
    }
    match read_startup_error(socket_path) {
        Some(startup_error) => ClientError::DaemonStartFailed(startup_error),
        None => err,
    }
}

#[cfg(test)]
#[path = "daemon_process_tests.rs"]
mod tests;
