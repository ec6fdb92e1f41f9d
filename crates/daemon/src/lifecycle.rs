// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle: the on-disk log, subsystem assembly, socket binding,
//! and teardown.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dw_supervisor::{ManagerConfig, ProcessManager};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::info;

use crate::env;
use crate::listener::{ListenCtx, Listener};
use crate::registry::SessionRegistry;
use crate::scheduler::{self, TaskScheduler};
use crate::socket::{self, SocketError, SocketManager};

/// Log size at which the current file is rotated aside (10 MB).
const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Marker line prefix appended at every startup attempt. The `dw` client
/// scans backwards for it to find where the current attempt begins, so the
/// format is shared through this constant rather than duplicated.
pub const STARTUP_MARKER_PREFIX: &str = "==== dwd start pid=";

/// The daemon's log file, prepared before tracing is initialized.
///
/// Lives next to the socket in the state directory. Startup rotates an
/// oversized log aside to `daemon.log.old` (one previous generation is
/// kept) and appends a marker line; startup failures are written
/// synchronously so the CLI can surface them even when the process exits
/// before the non-blocking tracing writer flushes.
pub struct DaemonLog {
    path: PathBuf,
    max_size: u64,
}

impl DaemonLog {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join("daemon.log"),
            max_size: MAX_LOG_SIZE,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rotate an oversized log aside and append the startup marker.
    pub fn prepare(&self) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.rotate_if_oversized();
        self.append_line(&format!(
            "{}{} ====",
            STARTUP_MARKER_PREFIX,
            std::process::id()
        ))
    }

    /// An oversized `daemon.log` becomes `daemon.log.old`, replacing any
    /// earlier generation. Best-effort: a failed rename never blocks startup.
    fn rotate_if_oversized(&self) {
        let oversized = std::fs::metadata(&self.path)
            .map(|m| m.len() >= self.max_size)
            .unwrap_or(false);
        if oversized {
            let _ = std::fs::rename(&self.path, self.path.with_extension("log.old"));
        }
    }

    /// Record a startup failure for the CLI to read back.
    pub fn record_startup_failure(&self, error: &dyn std::fmt::Display) {
        let _ = self.append_line(&format!("ERROR dwd startup failed: {error}"));
    }

    fn append_line(&self, line: &str) -> std::io::Result<()> {
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")
    }

    /// Route tracing output into the log file, filtered by `DW_LOG`.
    pub fn init_tracing(
        &self,
    ) -> std::io::Result<tracing_appender::non_blocking::WorkerGuard> {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let (writer, guard) = tracing_appender::non_blocking(file);
        let filter = EnvFilter::try_from_env("DW_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(writer))
            .try_init()
            .map_err(std::io::Error::other)?;
        Ok(guard)
    }

    #[cfg(test)]
    fn with_max_size(path: PathBuf, max_size: u64) -> Self {
        Self { path, max_size }
    }
}

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub socket_path: PathBuf,
    pub manager: ManagerConfig,
    pub max_clients: usize,
    pub stop_on_last_disconnect: bool,
}

impl DaemonConfig {
    /// Defaults plus `DW_*` overrides.
    pub fn from_env() -> Self {
        let mut manager = ManagerConfig::default();
        if let Some(interval) = env::sweep_interval() {
            manager.sweep_interval = interval;
        }
        Self {
            socket_path: socket::default_socket_path(),
            manager,
            max_clients: env::max_clients(),
            stop_on_last_disconnect: env::stop_on_last_disconnect(),
        }
    }

    /// Config rooted at an explicit socket path (used by tests).
    pub fn at(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            manager: ManagerConfig::default(),
            max_clients: 64,
            stop_on_last_disconnect: false,
        }
    }
}

/// A running daemon: socket bound, listener and background tasks spawned.
pub struct Daemon {
    manager: Arc<ProcessManager>,
    registry: Arc<SessionRegistry>,
    scheduler: Arc<TaskScheduler>,
    socket: SocketManager,
    shutdown_requested: Arc<Notify>,
    tasks: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for Daemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Daemon").finish_non_exhaustive()
    }
}

impl Daemon {
    /// Bind the socket and start serving. Must run inside a tokio runtime.
    pub fn start(config: DaemonConfig) -> Result<Self, SocketError> {
        let socket = SocketManager::new(config.socket_path);
        let unix_listener = socket.listen()?;

        let manager = ProcessManager::new(config.manager);
        let registry = Arc::new(SessionRegistry::new());
        let scheduler = Arc::new(TaskScheduler::new());
        let shutdown_requested = Arc::new(Notify::new());
        let shutdown_token = manager.shutdown_token().clone();

        let ctx = Arc::new(ListenCtx::new(
            Arc::clone(&manager),
            Arc::clone(&registry),
            Arc::clone(&scheduler),
            socket.socket_path().to_path_buf(),
            Arc::clone(&shutdown_requested),
            shutdown_token.clone(),
            config.max_clients,
            config.stop_on_last_disconnect,
        ));

        let mut tasks = vec![tokio::spawn(Listener::new(unix_listener, ctx).run())];
        if let Some(sweep) = manager.spawn_health_sweep() {
            tasks.push(sweep);
        }
        tasks.push(scheduler::spawn_ticker(
            Arc::clone(&scheduler),
            Arc::clone(&registry),
            shutdown_token,
        ));

        info!(path = %socket.socket_path().display(), "daemon serving");
        Ok(Self {
            manager,
            registry,
            scheduler,
            socket,
            shutdown_requested,
            tasks,
        })
    }

    pub fn socket_path(&self) -> &Path {
        self.socket.socket_path()
    }

    pub fn manager(&self) -> &Arc<ProcessManager> {
        &self.manager
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn scheduler(&self) -> &Arc<TaskScheduler> {
        &self.scheduler
    }

    /// Resolves when a client sends SHUTDOWN.
    pub async fn wait_shutdown_requested(&self) {
        self.shutdown_requested.notified().await;
    }

    /// Stop all processes, tear down background tasks, release the socket.
    pub async fn shutdown(self, deadline: Duration) {
        self.manager.shutdown(deadline).await;

        for mut task in self.tasks {
            // Tasks watch the shutdown token; give them a moment to finish.
            if tokio::time::timeout(Duration::from_secs(1), &mut task)
                .await
                .is_err()
            {
                task.abort();
            }
        }

        self.socket.close();
        info!("daemon stopped");
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
