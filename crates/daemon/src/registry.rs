// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session registry: terminal sessions keyed by code, with directory-scoped
//! lookup used by SESSION LIST/FIND/ATTACH.

use std::collections::HashMap;
use std::path::Path;

use dw_core::{next_code, Clock, DirFilter, Session, SystemClock};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::info;

/// Registry errors.
#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("session already exists: {0}")]
    AlreadyExists(String),

    #[error("session not found: {0}")]
    NotFound(String),
}

/// Parameters for registering a session.
#[derive(Debug, Clone, Default)]
pub struct NewSession {
    /// Explicit code; generated from `base` when absent.
    pub code: Option<String>,
    /// Code base; falls back to the command basename, then `session`.
    pub base: Option<String>,
    pub overlay_endpoint: String,
    pub directory: std::path::PathBuf,
    pub command: String,
    pub args: Vec<String>,
}

/// In-memory session registry.
pub struct SessionRegistry<C: Clock = SystemClock> {
    sessions: Mutex<HashMap<String, Session>>,
    clock: C,
}

impl<C: Clock> SessionRegistry<C> {
    pub fn with_clock(clock: C) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Register a session, failing on a duplicate explicit code.
    pub fn register(&self, new: NewSession) -> Result<Session, RegistryError> {
        let mut sessions = self.sessions.lock();

        let code = match new.code {
            Some(code) => {
                if sessions.contains_key(&code) {
                    return Err(RegistryError::AlreadyExists(code));
                }
                code
            }
            None => {
                let base = code_base(&new);
                next_code(&base, |c| sessions.contains_key(c))
            }
        };

        let now = self.clock.epoch_ms();
        let session = Session {
            code: code.clone(),
            directory: new.directory,
            overlay_endpoint: new.overlay_endpoint,
            command: new.command,
            args: new.args,
            created_at_ms: now,
            last_heartbeat_ms: now,
            attached: false,
        };
        info!(code, directory = %session.directory.display(), "session registered");
        sessions.insert(code, session.clone());
        Ok(session)
    }

    /// Remove a session. Idempotent; returns whether it existed.
    pub fn unregister(&self, code: &str) -> bool {
        let removed = self.sessions.lock().remove(code).is_some();
        if removed {
            info!(code, "session unregistered");
        }
        removed
    }

    /// Refresh a session's heartbeat timestamp.
    pub fn heartbeat(&self, code: &str) -> Result<(), RegistryError> {
        let mut sessions = self.sessions.lock();
        match sessions.get_mut(code) {
            Some(session) => {
                session.last_heartbeat_ms = self.clock.epoch_ms();
                Ok(())
            }
            None => Err(RegistryError::NotFound(code.to_string())),
        }
    }

    pub fn get(&self, code: &str) -> Option<Session> {
        self.sessions.lock().get(code).cloned()
    }

    /// Sessions selected by the directory filter, ordered by code.
    pub fn list(&self, filter: &DirFilter) -> Vec<Session> {
        let mut sessions: Vec<Session> = self
            .sessions
            .lock()
            .values()
            .filter(|s| filter.matches(&s.directory))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| a.code.cmp(&b.code));
        sessions
    }

    /// First free `base-N` code.
    pub fn generate_code(&self, base: &str) -> String {
        let sessions = self.sessions.lock();
        next_code(base, |c| sessions.contains_key(c))
    }

    /// Walk `dir` upward and return the session registered closest to it.
    pub fn find(&self, dir: &Path) -> Option<Session> {
        let sessions = self.sessions.lock();
        for ancestor in dir.ancestors() {
            let mut found: Vec<&Session> = sessions
                .values()
                .filter(|s| s.directory == ancestor)
                .collect();
            if !found.is_empty() {
                // Prefer the most recently active session for the directory.
                found.sort_by_key(|s| std::cmp::Reverse(s.last_heartbeat_ms));
                return found.first().map(|s| (*s).clone());
            }
        }
        None
    }

    /// [`find`](Self::find) plus recording the attachment on the session.
    pub fn attach(&self, dir: &Path) -> Option<Session> {
        let code = self.find(dir)?.code;
        let mut sessions = self.sessions.lock();
        let session = sessions.get_mut(&code)?;
        session.attached = true;
        session.last_heartbeat_ms = self.clock.epoch_ms();
        Some(session.clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}

impl SessionRegistry<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for SessionRegistry<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

fn code_base(new: &NewSession) -> String {
    if let Some(base) = &new.base {
        if !base.is_empty() {
            return base.clone();
        }
    }
    Path::new(&new.command)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("session")
        .to_string()
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
