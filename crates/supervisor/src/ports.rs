// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Port-conflict detection and best-effort resolution.
//!
//! Detection scans captured child output against an ordered pattern list
//! (first match wins). Resolution identifies the blocking pids with `lsof`,
//! falling back to `ss`, and terminates them SIGTERM-then-SIGKILL. Managed
//! processes are never killed here; the manager refuses and surfaces a
//! structured error instead.

use std::process::Output;
use std::sync::OnceLock;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use regex::Regex;
use tokio::process::Command;
use tracing::{debug, warn};

/// How long blockers get to exit after SIGTERM before SIGKILL.
pub const TERM_WAIT: Duration = Duration::from_millis(500);

/// Settle time after killing blockers, letting the OS release the port.
pub const PORT_SETTLE: Duration = Duration::from_millis(200);

/// Timeout for the `lsof`/`ss` probes.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Ordered port-in-use patterns; first match wins.
///
/// The leading pattern covers node-style runtimes, the second Go-style
/// listeners, and the last two generic bind failures.
const PORT_PATTERNS: &[&str] = &[
    r"EADDRINUSE.*:(\d+)",
    r"listen tcp[^\d]*:(\d+).*address already in use",
    r"[Aa]ddress already in use.*[':]+(\d+)",
    r"[Aa]ddress already in use[^\d]*(\d+)",
];

fn port_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        PORT_PATTERNS
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect()
    })
}

/// Scan process output for a port-in-use failure, returning the port.
pub fn detect_port_conflict(output: &str) -> Option<u16> {
    for pattern in port_patterns() {
        if let Some(caps) = pattern.captures(output) {
            let port = caps.get(1)?.as_str().parse::<u32>().ok()?;
            if (1..=65535).contains(&port) {
                return Some(port as u16);
            }
        }
    }
    None
}

/// Identify pids listening on `port` via `lsof`, falling back to `ss`.
pub async fn find_port_blockers(port: u16) -> Vec<u32> {
    let lsof = run_probe(
        Command::new("lsof").args(["-t", "-i", &format!(":{port}"), "-sTCP:LISTEN"]),
        "lsof",
    )
    .await;
    if let Some(output) = lsof {
        let pids = parse_lsof_pids(&String::from_utf8_lossy(&output.stdout));
        if !pids.is_empty() {
            return pids;
        }
    }

    let ss = run_probe(Command::new("ss").args(["-lptn", &format!("sport = :{port}")]), "ss").await;
    match ss {
        Some(output) => parse_ss_pids(&String::from_utf8_lossy(&output.stdout)),
        None => Vec::new(),
    }
}

/// Terminate `pids` cooperatively, then forcefully, then let the port settle.
///
/// Returns the pids that received a signal. Callers must have already
/// excluded managed processes.
pub async fn clear_blockers(pids: &[u32]) -> Vec<u32> {
    let mut signaled = Vec::new();
    for &pid in pids {
        if signal_pid(pid, Signal::SIGTERM) {
            signaled.push(pid);
        }
    }

    tokio::time::sleep(TERM_WAIT).await;

    for &pid in pids {
        if pid_alive(pid) {
            debug!(pid, "blocker survived SIGTERM, sending SIGKILL");
            signal_pid(pid, Signal::SIGKILL);
        }
    }

    tokio::time::sleep(PORT_SETTLE).await;
    signaled
}

/// Whether `pid` still exists (signal 0 probe).
pub fn pid_alive(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

fn signal_pid(pid: u32, sig: Signal) -> bool {
    match kill(Pid::from_raw(pid as i32), sig) {
        Ok(()) => true,
        Err(e) => {
            debug!(pid, signal = %sig, error = %e, "failed to signal blocker");
            false
        }
    }
}

async fn run_probe(cmd: &mut Command, description: &str) -> Option<Output> {
    match tokio::time::timeout(PROBE_TIMEOUT, cmd.output()).await {
        Ok(Ok(output)) => Some(output),
        Ok(Err(e)) => {
            debug!(probe = description, error = %e, "port probe unavailable");
            None
        }
        Err(_) => {
            warn!(probe = description, "port probe timed out");
            None
        }
    }
}

fn parse_lsof_pids(stdout: &str) -> Vec<u32> {
    let mut pids: Vec<u32> = stdout
        .lines()
        .filter_map(|line| line.trim().parse::<u32>().ok())
        .collect();
    pids.sort_unstable();
    pids.dedup();
    pids
}

fn parse_ss_pids(stdout: &str) -> Vec<u32> {
    static PID_RE: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(re) = PID_RE.get_or_init(|| Regex::new(r"pid=(\d+)").ok()) else {
        return Vec::new();
    };

    let mut pids: Vec<u32> = re
        .captures_iter(stdout)
        .filter_map(|caps| caps.get(1)?.as_str().parse::<u32>().ok())
        .collect();
    pids.sort_unstable();
    pids.dedup();
    pids
}

#[cfg(test)]
#[path = "ports_tests.rs"]
mod tests;
