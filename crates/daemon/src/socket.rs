// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Exclusive ownership of the daemon's Unix socket.
//!
//! Binding probes an existing socket file first: a successful trial connect
//! means another daemon is alive, anything else marks the file stale and
//! reclaims it. A pidfile next to the socket records the owner.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::net::UnixListener;
use tracing::{debug, info, warn};

/// Socket manager errors.
#[derive(Debug, Error)]
pub enum SocketError {
    #[error("daemon already running at {0}")]
    AlreadyRunning(PathBuf),

    #[error("failed to bind socket at {path}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write pidfile at {path}: {source}")]
    Pidfile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Owns the socket path and its `<path>.pid` pidfile.
pub struct SocketManager {
    socket_path: PathBuf,
    pidfile_path: PathBuf,
}

impl SocketManager {
    pub fn new(socket_path: PathBuf) -> Self {
        let pidfile_path = PathBuf::from(format!("{}.pid", socket_path.display()));
        Self {
            socket_path,
            pidfile_path,
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn pidfile_path(&self) -> &Path {
        &self.pidfile_path
    }

    /// Acquire the socket: probe and reclaim a stale file, bind with
    /// owner-only permissions, and write the pidfile.
    pub fn listen(&self) -> Result<UnixListener, SocketError> {
        if self.socket_path.exists() {
            if std::os::unix::net::UnixStream::connect(&self.socket_path).is_ok() {
                return Err(SocketError::AlreadyRunning(self.socket_path.clone()));
            }
            warn!(path = %self.socket_path.display(), "removing stale socket");
            std::fs::remove_file(&self.socket_path)?;
        }

        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
            if let Err(e) =
                std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700))
            {
                debug!(error = %e, "could not restrict socket directory permissions");
            }
        }

        let listener = UnixListener::bind(&self.socket_path).map_err(|e| SocketError::Bind {
            path: self.socket_path.clone(),
            source: e,
        })?;
        std::fs::set_permissions(&self.socket_path, std::fs::Permissions::from_mode(0o600))?;

        std::fs::write(&self.pidfile_path, format!("{}\n", std::process::id())).map_err(|e| {
            // The socket is useless without the pidfile; release it.
            let _ = std::fs::remove_file(&self.socket_path);
            SocketError::Pidfile {
                path: self.pidfile_path.clone(),
                source: e,
            }
        })?;

        info!(path = %self.socket_path.display(), "socket bound");
        Ok(listener)
    }

    /// Read the owner pid recorded next to the socket.
    pub fn read_pidfile(&self) -> Option<u32> {
        std::fs::read_to_string(&self.pidfile_path)
            .ok()?
            .trim()
            .parse()
            .ok()
    }

    /// Remove the socket and pidfile. The listener itself is dropped by the
    /// caller; removal here makes the path immediately reusable.
    pub fn close(&self) {
        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(error = %e, "failed to remove socket file");
            }
        }
        if let Err(e) = std::fs::remove_file(&self.pidfile_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(error = %e, "failed to remove pidfile");
            }
        }
    }
}

/// Default socket path: the per-user runtime directory when the OS exposes
/// one, else a temp location scoped by uid.
pub fn default_socket_path() -> PathBuf {
    default_state_dir().join("daemon.sock")
}

/// State directory holding the socket, pidfile, and daemon log.
pub fn default_state_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("DW_STATE_DIR") {
        return PathBuf::from(dir);
    }
    if let Some(runtime) = dirs::runtime_dir() {
        return runtime.join("dw");
    }
    let uid = nix::unistd::getuid();
    std::env::temp_dir().join(format!("dw-{uid}"))
}

#[cfg(test)]
#[path = "socket_tests.rs"]
mod tests;
