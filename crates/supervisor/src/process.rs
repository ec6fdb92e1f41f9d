// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One managed child process: identity, atomic state, captured output,
//! exit bookkeeping, and the cancellation/done signals.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::time::Instant;

use dw_core::{ProcessKey, ProcessSpec, ProcessState, RingBuffer};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Runtime record for a supervised child process.
///
/// State is mutated only through [`compare_and_swap_state`]
/// (`ManagedProcess::compare_and_swap_state`) by the supervisor that owns the
/// record; everything else is observable concurrently.
pub struct ManagedProcess {
    spec: ProcessSpec,
    state: AtomicU8,
    /// OS pid; 0 until spawned.
    pid: AtomicU32,
    /// Epoch milliseconds; 0 until set.
    started_at_ms: AtomicU64,
    ended_at_ms: AtomicU64,
    exit_code: Mutex<Option<i32>>,
    stdout: Mutex<RingBuffer>,
    stderr: Mutex<RingBuffer>,
    /// Requests cooperative teardown of the I/O and reaper tasks.
    cancel: CancellationToken,
    /// Closed exactly once, after the child is reaped and its exit recorded.
    done: CancellationToken,
    created_at: Instant,
}

impl std::fmt::Debug for ManagedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedProcess").finish_non_exhaustive()
    }
}

impl ManagedProcess {
    pub fn new(spec: ProcessSpec) -> Self {
        let buffer_size = spec.buffer_size;
        Self {
            spec,
            state: AtomicU8::new(ProcessState::Pending as u8),
            pid: AtomicU32::new(0),
            started_at_ms: AtomicU64::new(0),
            ended_at_ms: AtomicU64::new(0),
            exit_code: Mutex::new(None),
            stdout: Mutex::new(RingBuffer::with_capacity(buffer_size)),
            stderr: Mutex::new(RingBuffer::with_capacity(buffer_size)),
            cancel: CancellationToken::new(),
            done: CancellationToken::new(),
            created_at: Instant::now(),
        }
    }

    pub fn spec(&self) -> &ProcessSpec {
        &self.spec
    }

    pub fn key(&self) -> ProcessKey {
        self.spec.key()
    }

    pub fn id(&self) -> &str {
        &self.spec.id
    }

    pub fn directory(&self) -> &PathBuf {
        &self.spec.directory
    }

    pub fn state(&self) -> ProcessState {
        ProcessState::from_u8(self.state.load(Ordering::SeqCst)).unwrap_or(ProcessState::Failed)
    }

    /// Atomically transition `old -> new` if the lifecycle graph allows it.
    ///
    /// Returns false when the current state is not `old` or the edge is not
    /// in the graph; a successful transition can never be performed twice.
    pub fn compare_and_swap_state(&self, old: ProcessState, new: ProcessState) -> bool {
        if !old.can_transition(new) {
            return false;
        }
        self.state
            .compare_exchange(old as u8, new as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn pid(&self) -> Option<u32> {
        match self.pid.load(Ordering::SeqCst) {
            0 => None,
            pid => Some(pid),
        }
    }

    pub(crate) fn set_pid(&self, pid: u32) {
        self.pid.store(pid, Ordering::SeqCst);
    }

    pub fn started_at_ms(&self) -> Option<u64> {
        match self.started_at_ms.load(Ordering::SeqCst) {
            0 => None,
            ms => Some(ms),
        }
    }

    pub fn ended_at_ms(&self) -> Option<u64> {
        match self.ended_at_ms.load(Ordering::SeqCst) {
            0 => None,
            ms => Some(ms),
        }
    }

    pub(crate) fn set_started_at_ms(&self, ms: u64) {
        self.started_at_ms.store(ms, Ordering::SeqCst);
    }

    pub(crate) fn set_ended_at_ms(&self, ms: u64) {
        self.ended_at_ms.store(ms, Ordering::SeqCst);
    }

    /// Monotonic age of the record, used by the health sweep.
    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }

    pub fn exit_code(&self) -> Option<i32> {
        *self.exit_code.lock()
    }

    pub(crate) fn record_exit_code(&self, code: i32) {
        *self.exit_code.lock() = Some(code);
    }

    pub(crate) fn append_stdout(&self, bytes: &[u8]) {
        self.stdout.lock().append(bytes);
    }

    pub(crate) fn append_stderr(&self, bytes: &[u8]) {
        self.stderr.lock().append(bytes);
    }

    /// Snapshot of captured stdout and its truncation flag.
    pub fn stdout(&self) -> (Vec<u8>, bool) {
        let buf = self.stdout.lock();
        (buf.snapshot(), buf.truncated())
    }

    /// Snapshot of captured stderr and its truncation flag.
    pub fn stderr(&self) -> (Vec<u8>, bool) {
        let buf = self.stderr.lock();
        (buf.snapshot(), buf.truncated())
    }

    /// Combined view of both streams.
    ///
    /// The streams are captured in independent buffers, so this is a
    /// stdout-then-stderr concatenation, not a faithful interleaving of the
    /// original write order.
    pub fn combined_output(&self) -> (Vec<u8>, bool) {
        let (mut out, out_trunc) = self.stdout();
        let (err, err_trunc) = self.stderr();
        out.extend_from_slice(&err);
        (out, out_trunc || err_trunc)
    }

    /// Token the supervisor cancels to request cooperative teardown.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Completion signal; closed once after the exit code is stored.
    pub fn done(&self) -> &CancellationToken {
        &self.done
    }

    pub fn is_done(&self) -> bool {
        self.done.is_cancelled()
    }

    pub async fn wait_done(&self) {
        self.done.cancelled().await;
    }

    pub(crate) fn mark_done(&self) {
        self.done.cancel();
    }

    /// Serializable status summary for PROC STATUS / PROC LIST.
    pub fn status(&self) -> ProcessStatus {
        let (_, stdout_truncated) = self.stdout();
        let (_, stderr_truncated) = self.stderr();
        ProcessStatus {
            id: self.spec.id.clone(),
            directory: self.spec.directory.clone(),
            command: self.spec.command.clone(),
            args: self.spec.args.clone(),
            labels: self.spec.labels.clone(),
            state: self.state(),
            pid: self.pid(),
            exit_code: self.exit_code(),
            started_at_ms: self.started_at_ms(),
            ended_at_ms: self.ended_at_ms(),
            stdout_truncated,
            stderr_truncated,
        }
    }
}

/// Point-in-time view of a managed process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessStatus {
    pub id: String,
    pub directory: PathBuf,
    pub command: String,
    pub args: Vec<String>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    pub state: ProcessState,
    pub pid: Option<u32>,
    pub exit_code: Option<i32>,
    pub started_at_ms: Option<u64>,
    pub ended_at_ms: Option<u64>,
    #[serde(default)]
    pub stdout_truncated: bool,
    #[serde(default)]
    pub stderr_truncated: bool,
}

#[cfg(test)]
#[path = "process_tests.rs"]
mod tests;
