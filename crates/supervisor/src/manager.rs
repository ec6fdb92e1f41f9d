// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Registry and lifecycle driver for managed processes.
//!
//! Keyed by `(id, directory)`. Every state transition goes through the
//! record's compare-and-swap, so concurrent observers only ever see the
//! lifecycle move forward. Children are spawned into their own process
//! group and signaled group-wide on stop.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dw_core::{Clock, DirFilter, ProcessKey, ProcessSpec, ProcessState, SystemClock};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ports;
use crate::process::ManagedProcess;

/// Window in which a fresh child is watched for an early port-conflict exit.
pub const PORT_CHECK_WINDOW: Duration = Duration::from_millis(1500);

/// Extra time a force-killed process gets to be reaped.
const FORCE_KILL_WINDOW: Duration = Duration::from_secs(2);

/// Shutdown deadlines below this skip graceful termination entirely.
const AGGRESSIVE_THRESHOLD: Duration = Duration::from_secs(3);

/// Starting records older than this are marked failed by the health sweep.
const STARTING_DEADLINE: Duration = Duration::from_secs(30);

/// Supervisor configuration.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Time a stopping process group gets after SIGTERM before SIGKILL.
    pub graceful_timeout: Duration,
    /// Health sweep period; zero disables the sweep.
    pub sweep_interval: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            graceful_timeout: Duration::from_secs(5),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

/// Supervisor errors.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("process already exists: {0}")]
    AlreadyExists(ProcessKey),

    #[error("process not found: {0}")]
    NotFound(String),

    #[error("process {key} is in state {state}")]
    InvalidState { key: ProcessKey, state: ProcessState },

    #[error("supervisor is shutting down")]
    ShuttingDown,

    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("canceled while {0}")]
    Canceled(String),

    #[error("timed out while {0}")]
    Timeout(String),
}

/// Live counter snapshot surfaced through INFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessCounters {
    pub active: usize,
    pub total_started: u64,
    pub total_failed: u64,
}

/// Result of a start-or-reuse call.
pub struct StartOutcome {
    pub process: Arc<ManagedProcess>,
    /// An existing healthy record satisfied the request.
    pub reused: bool,
    /// A stale terminal record was removed before starting.
    pub cleaned: bool,
    /// The start was retried after clearing a port conflict.
    pub port_retried: bool,
    pub ports_cleared: Vec<u16>,
    /// Set when a conflict was detected but could not be resolved safely.
    pub port_error: Option<String>,
}

impl StartOutcome {
    fn fresh(process: Arc<ManagedProcess>) -> Self {
        Self {
            process,
            reused: false,
            cleaned: false,
            port_retried: false,
            ports_cleared: Vec::new(),
            port_error: None,
        }
    }
}

/// Registry and lifecycle driver for all managed processes.
pub struct ProcessManager {
    procs: RwLock<HashMap<ProcessKey, Arc<ManagedProcess>>>,
    active: AtomicUsize,
    total_started: AtomicU64,
    total_failed: AtomicU64,
    shutting_down: AtomicBool,
    shutdown_token: CancellationToken,
    config: ManagerConfig,
    clock: SystemClock,
}

impl ProcessManager {
    pub fn new(config: ManagerConfig) -> Arc<Self> {
        Arc::new(Self {
            procs: RwLock::new(HashMap::new()),
            active: AtomicUsize::new(0),
            total_started: AtomicU64::new(0),
            total_failed: AtomicU64::new(0),
            shutting_down: AtomicBool::new(false),
            shutdown_token: CancellationToken::new(),
            config,
            clock: SystemClock,
        })
    }

    pub fn counters(&self) -> ProcessCounters {
        ProcessCounters {
            active: self.active.load(Ordering::SeqCst),
            total_started: self.total_started.load(Ordering::SeqCst),
            total_failed: self.total_failed.load(Ordering::SeqCst),
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Record a transition into Failed; counts each record at most once
    /// because the CAS can only succeed once per edge.
    fn mark_failed(&self, proc: &ManagedProcess, from: ProcessState) -> bool {
        if proc.compare_and_swap_state(from, ProcessState::Failed) {
            self.total_failed.fetch_add(1, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    // ------------------------------------------------------------------
    // Registry
    // ------------------------------------------------------------------

    /// Insert a record under its `(id, directory)` key.
    pub fn register(&self, proc: Arc<ManagedProcess>) -> Result<(), SupervisorError> {
        let key = proc.key();
        let mut procs = self.procs.write();
        if procs.contains_key(&key) {
            return Err(SupervisorError::AlreadyExists(key));
        }
        procs.insert(key, proc);
        self.active.fetch_add(1, Ordering::SeqCst);
        self.total_started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Remove a record, releasing its key for reuse.
    pub fn remove(&self, key: &ProcessKey) -> Option<Arc<ManagedProcess>> {
        let removed = self.procs.write().remove(key);
        if removed.is_some() {
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
        removed
    }

    /// Canonical lookup by composite key.
    pub fn get_by_path(&self, id: &str, directory: &std::path::Path) -> Option<Arc<ManagedProcess>> {
        self.procs
            .read()
            .get(&ProcessKey::new(id, directory))
            .cloned()
    }

    /// Back-compat lookup by id alone: scans and returns the first match.
    /// Prefer [`get_by_path`](Self::get_by_path); two directories may share an id.
    pub fn get(&self, id: &str) -> Option<Arc<ManagedProcess>> {
        self.procs
            .read()
            .values()
            .find(|p| p.id() == id)
            .cloned()
    }

    /// Find the running record that owns `pid`.
    pub fn get_by_pid(&self, pid: u32) -> Option<Arc<ManagedProcess>> {
        self.procs
            .read()
            .values()
            .find(|p| p.pid() == Some(pid) && !p.state().is_terminal())
            .cloned()
    }

    pub fn is_managed_pid(&self, pid: u32) -> bool {
        self.get_by_pid(pid).is_some()
    }

    /// Records selected by the directory filter, ordered by id.
    pub fn list(&self, filter: &DirFilter) -> Vec<Arc<ManagedProcess>> {
        let mut procs: Vec<_> = self
            .procs
            .read()
            .values()
            .filter(|p| filter.matches(p.directory()))
            .cloned()
            .collect();
        procs.sort_by(|a, b| a.id().cmp(b.id()));
        procs
    }

    fn snapshot(&self) -> Vec<Arc<ManagedProcess>> {
        self.procs.read().values().cloned().collect()
    }

    // ------------------------------------------------------------------
    // Start
    // ------------------------------------------------------------------

    /// Spawn a new managed process from `spec`.
    ///
    /// Fails with `AlreadyExists` when the key is taken and `ShuttingDown`
    /// once shutdown has begun.
    pub async fn start(
        self: &Arc<Self>,
        spec: ProcessSpec,
    ) -> Result<Arc<ManagedProcess>, SupervisorError> {
        if self.is_shutting_down() {
            return Err(SupervisorError::ShuttingDown);
        }
        let proc = Arc::new(ManagedProcess::new(spec));
        self.start_record(Arc::clone(&proc)).await?;
        Ok(proc)
    }

    /// Drive a Pending record through Starting into Running.
    async fn start_record(
        self: &Arc<Self>,
        proc: Arc<ManagedProcess>,
    ) -> Result<(), SupervisorError> {
        if !proc.compare_and_swap_state(ProcessState::Pending, ProcessState::Starting) {
            return Err(SupervisorError::InvalidState {
                key: proc.key(),
                state: proc.state(),
            });
        }

        if let Err(e) = self.register(Arc::clone(&proc)) {
            // Roll back so the caller can retry once the collision clears.
            proc.compare_and_swap_state(ProcessState::Starting, ProcessState::Pending);
            return Err(e);
        }

        let spec = proc.spec().clone();
        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.args)
            .current_dir(&spec.directory)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);
        if let Some(env) = &spec.env {
            cmd.env_clear().envs(env.iter().map(|(k, v)| (k, v)));
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.mark_failed(&proc, ProcessState::Starting);
                proc.mark_done();
                return Err(SupervisorError::Spawn {
                    command: spec.command.clone(),
                    source: e,
                });
            }
        };

        let pid = child.id().unwrap_or_default();
        proc.set_pid(pid);
        proc.set_started_at_ms(self.clock.epoch_ms());
        proc.compare_and_swap_state(ProcessState::Starting, ProcessState::Running);
        info!(id = proc.id(), pid, command = %spec.command, "process started");

        // One reader task per stream keeps ring-buffer writes single-writer.
        let mut readers = JoinSet::new();
        if let Some(stdout) = child.stdout.take() {
            let proc = Arc::clone(&proc);
            readers.spawn(async move { copy_stream(stdout, |b| proc.append_stdout(b)).await });
        }
        if let Some(stderr) = child.stderr.take() {
            let proc = Arc::clone(&proc);
            readers.spawn(async move { copy_stream(stderr, |b| proc.append_stderr(b)).await });
        }

        let manager = Arc::clone(self);
        tokio::spawn(async move { manager.reap(proc, child, readers).await });
        Ok(())
    }

    /// Wait for the child to exit, then record the outcome and close `done`.
    async fn reap(
        &self,
        proc: Arc<ManagedProcess>,
        mut child: tokio::process::Child,
        mut readers: JoinSet<()>,
    ) {
        let status = child.wait().await;

        // Drain both streams before the exit is observable so late output is
        // captured by the time anyone woken by done() reads the buffers.
        while readers.join_next().await.is_some() {}

        let code = match status {
            Ok(status) => status.code().unwrap_or(-1),
            Err(e) => {
                warn!(id = proc.id(), error = %e, "wait failed for child");
                -1
            }
        };
        proc.record_exit_code(code);
        proc.set_ended_at_ms(self.clock.epoch_ms());

        loop {
            let current = proc.state();
            let next = match current {
                ProcessState::Stopping => ProcessState::Stopped,
                _ if code == 0 => ProcessState::Stopped,
                _ => ProcessState::Failed,
            };
            if current.is_terminal() {
                break;
            }
            let ok = if next == ProcessState::Failed {
                self.mark_failed(&proc, current)
            } else {
                proc.compare_and_swap_state(current, next)
            };
            if ok {
                break;
            }
        }

        debug!(id = proc.id(), code, state = %proc.state(), "process reaped");
        proc.mark_done();
    }

    // ------------------------------------------------------------------
    // Stop
    // ------------------------------------------------------------------

    /// Stop a process group, gracefully unless `force`.
    ///
    /// Stopping an already-terminal process succeeds as a no-op. The record
    /// stays registered; callers that want the key back use [`remove`]
    /// (Self::remove) once the state is terminal.
    pub async fn stop(
        &self,
        id: &str,
        directory: &std::path::Path,
        force: bool,
    ) -> Result<(), SupervisorError> {
        let proc = self
            .get_by_path(id, directory)
            .ok_or_else(|| SupervisorError::NotFound(id.to_string()))?;
        self.stop_process(&proc, force).await
    }

    pub async fn stop_process(
        &self,
        proc: &Arc<ManagedProcess>,
        force: bool,
    ) -> Result<(), SupervisorError> {
        let state = proc.state();
        if state.is_terminal() {
            return Ok(());
        }

        if state == ProcessState::Stopping {
            // Another caller owns the teardown; wait for it.
            return self.await_done(proc, self.config.graceful_timeout + FORCE_KILL_WINDOW).await;
        }

        if !proc.compare_and_swap_state(ProcessState::Running, ProcessState::Stopping) {
            let now = proc.state();
            if now.is_terminal() {
                return Ok(());
            }
            if now == ProcessState::Stopping {
                return self
                    .await_done(proc, self.config.graceful_timeout + FORCE_KILL_WINDOW)
                    .await;
            }
            return Err(SupervisorError::InvalidState {
                key: proc.key(),
                state: now,
            });
        }

        proc.cancel();
        let Some(pid) = proc.pid() else {
            // Never spawned; nothing to signal.
            proc.compare_and_swap_state(ProcessState::Stopping, ProcessState::Stopped);
            proc.mark_done();
            return Ok(());
        };

        if !force {
            debug!(id = proc.id(), pid, "sending SIGTERM to process group");
            signal_group(pid, Signal::SIGTERM);
            if self.await_done(proc, self.config.graceful_timeout).await.is_ok() {
                return Ok(());
            }
            debug!(id = proc.id(), pid, "graceful timeout expired");
        }

        debug!(id = proc.id(), pid, "sending SIGKILL to process group");
        signal_group(pid, Signal::SIGKILL);
        self.await_done(proc, FORCE_KILL_WINDOW).await
    }

    async fn await_done(
        &self,
        proc: &Arc<ManagedProcess>,
        timeout: Duration,
    ) -> Result<(), SupervisorError> {
        tokio::time::timeout(timeout, proc.wait_done())
            .await
            .map_err(|_| SupervisorError::Timeout(format!("stopping {}", proc.key())))
    }

    /// Stop an existing record, drop it, and start a fresh one with the same spec.
    pub async fn restart(
        self: &Arc<Self>,
        id: &str,
        directory: &std::path::Path,
    ) -> Result<Arc<ManagedProcess>, SupervisorError> {
        let existing = self
            .get_by_path(id, directory)
            .ok_or_else(|| SupervisorError::NotFound(id.to_string()))?;
        let spec = existing.spec().clone();

        self.stop_process(&existing, false).await?;
        self.remove(&existing.key());
        self.start(spec).await
    }

    // ------------------------------------------------------------------
    // Start-or-reuse
    // ------------------------------------------------------------------

    /// Idempotent start with port-conflict auto-recovery.
    ///
    /// A healthy record with the same key is returned as reused; stale
    /// records are cleaned up first. A fresh child that fails inside
    /// [`PORT_CHECK_WINDOW`] with a recognized port-in-use message gets one
    /// retry after the unmanaged blockers are cleared.
    pub async fn start_or_reuse(
        self: &Arc<Self>,
        spec: ProcessSpec,
        cancel: &CancellationToken,
    ) -> Result<StartOutcome, SupervisorError> {
        let mut cleaned = false;

        if let Some(existing) = self.get_by_path(&spec.id, &spec.directory) {
            match existing.state() {
                ProcessState::Running | ProcessState::Starting => {
                    return Ok(StartOutcome {
                        reused: true,
                        ..StartOutcome::fresh(existing)
                    });
                }
                ProcessState::Stopped | ProcessState::Failed => {
                    self.remove(&existing.key());
                    cleaned = true;
                }
                ProcessState::Stopping => {
                    tokio::select! {
                        _ = existing.wait_done() => {}
                        _ = cancel.cancelled() => {
                            return Err(SupervisorError::Canceled(
                                "waiting for previous instance to stop".into(),
                            ));
                        }
                    }
                    self.remove(&existing.key());
                    cleaned = true;
                }
                ProcessState::Pending => {
                    self.remove(&existing.key());
                    cleaned = true;
                }
            }
        }

        let proc = self.start(spec.clone()).await?;
        let mut outcome = StartOutcome {
            cleaned,
            ..StartOutcome::fresh(Arc::clone(&proc))
        };

        // Watch the fresh child briefly for an early port-conflict exit.
        tokio::select! {
            _ = proc.wait_done() => {}
            _ = tokio::time::sleep(PORT_CHECK_WINDOW) => return Ok(outcome),
            _ = cancel.cancelled() => {
                self.stop_process(&proc, true).await.ok();
                return Err(SupervisorError::Canceled("starting process".into()));
            }
        }

        if proc.state() != ProcessState::Failed {
            return Ok(outcome);
        }

        let (output, _) = proc.combined_output();
        let Some(port) = ports::detect_port_conflict(&String::from_utf8_lossy(&output)) else {
            return Ok(outcome);
        };

        info!(id = proc.id(), port, "port conflict detected, probing blockers");
        let blockers = ports::find_port_blockers(port).await;

        if let Some(&managed) = blockers.iter().find(|&&pid| self.is_managed_pid(pid)) {
            let holder = self
                .get_by_pid(managed)
                .map(|p| p.id().to_string())
                .unwrap_or_else(|| "unknown".to_string());
            outcome.port_error = Some(format!(
                "port {port} is held by managed process {holder} (pid {managed})"
            ));
            return Ok(outcome);
        }

        if blockers.is_empty() {
            outcome.port_error = Some(format!("port {port} in use but no blocking pid found"));
            return Ok(outcome);
        }

        ports::clear_blockers(&blockers).await;
        self.remove(&proc.key());

        match self.start(spec).await {
            Ok(retried) => {
                outcome.process = retried;
                outcome.port_retried = true;
                outcome.ports_cleared = vec![port];
                Ok(outcome)
            }
            Err(e) => {
                // Hand back the original failed record so its output can be inspected.
                outcome.port_error = Some(format!("retry after clearing port {port} failed: {e}"));
                Ok(outcome)
            }
        }
    }

    // ------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------

    /// Shutdown signal, closed once [`shutdown`](Self::shutdown) begins.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown_token
    }

    /// Stop everything and refuse further starts.
    ///
    /// Deadlines under 3 s enter aggressive mode and skip graceful
    /// termination.
    pub async fn shutdown(self: &Arc<Self>, deadline: Duration) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown_token.cancel();
        let aggressive = deadline < AGGRESSIVE_THRESHOLD;
        info!(aggressive, "supervisor shutting down");
        self.stop_all_inner(aggressive, deadline).await;
    }

    /// Stop all running processes without flipping the shutdown flag;
    /// callers may start new processes afterwards.
    pub async fn stop_all(self: &Arc<Self>, deadline: Duration) {
        self.stop_all_inner(deadline < AGGRESSIVE_THRESHOLD, deadline).await;
    }

    async fn stop_all_inner(self: &Arc<Self>, aggressive: bool, deadline: Duration) {
        let procs: Vec<_> = self
            .snapshot()
            .into_iter()
            .filter(|p| !p.state().is_terminal())
            .collect();
        if procs.is_empty() {
            return;
        }

        let mut stops = JoinSet::new();
        for proc in &procs {
            let manager = Arc::clone(self);
            let proc = Arc::clone(proc);
            stops.spawn(async move { manager.stop_process(&proc, aggressive).await });
        }

        let drained = tokio::time::timeout(deadline, async {
            while stops.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            stops.abort_all();
            for proc in &procs {
                if !proc.is_done() {
                    if let Some(pid) = proc.pid() {
                        warn!(id = proc.id(), pid, "deadline expired, force-killing");
                        signal_group(pid, Signal::SIGKILL);
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Health sweep
    // ------------------------------------------------------------------

    /// Spawn the periodic health sweep; returns None when disabled.
    pub fn spawn_health_sweep(self: &Arc<Self>) -> Option<tokio::task::JoinHandle<()>> {
        let interval = self.config.sweep_interval;
        if interval.is_zero() {
            return None;
        }
        let manager = Arc::clone(self);
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => manager.sweep_once(),
                    _ = manager.shutdown_token.cancelled() => break,
                }
            }
        }))
    }

    /// One pass of the health sweep, reconciling stuck records.
    pub fn sweep_once(&self) {
        for proc in self.snapshot() {
            match proc.state() {
                ProcessState::Running if proc.is_done() => {
                    // Exited without a state update; the reaper should have
                    // handled this, so treat it as a failure.
                    if self.mark_failed(&proc, ProcessState::Running) {
                        warn!(id = proc.id(), "sweep: running process had already exited");
                    }
                }
                ProcessState::Starting if proc.age() > STARTING_DEADLINE => {
                    if self.mark_failed(&proc, ProcessState::Starting) {
                        warn!(id = proc.id(), "sweep: process stuck in starting");
                        proc.mark_done();
                    }
                }
                ProcessState::Stopping if proc.is_done() => {
                    proc.compare_and_swap_state(ProcessState::Stopping, ProcessState::Stopped);
                }
                _ => {}
            }
        }
    }
}

/// Signal an entire process group; the child is its own group leader.
fn signal_group(pid: u32, sig: Signal) {
    if let Err(e) = killpg(Pid::from_raw(pid as i32), sig) {
        debug!(pid, signal = %sig, error = %e, "killpg failed");
    }
}

/// Copy a child stream into its ring buffer until EOF.
async fn copy_stream<R: AsyncReadExt + Unpin>(mut stream: R, mut write: impl FnMut(&[u8])) {
    let mut buf = [0u8; 4096];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => write(&buf[..n]),
        }
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
