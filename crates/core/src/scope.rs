// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Directory-scoped filtering shared by all list operations.
//!
//! A recorded directory matches a caller's directory when it is equal to it
//! or is an ancestor of it. `global` bypasses the filter entirely.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// The `{directory?, global?}` argument accepted by list operations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DirFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
    #[serde(default)]
    pub global: bool,
}

impl DirFilter {
    pub fn global() -> Self {
        Self {
            directory: None,
            global: true,
        }
    }

    pub fn under(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: Some(directory.into()),
            global: false,
        }
    }

    /// Whether an item recorded under `recorded` is selected by this filter.
    ///
    /// An absent directory behaves like `global`: there is nothing to scope by.
    pub fn matches(&self, recorded: &Path) -> bool {
        if self.global {
            return true;
        }
        match &self.directory {
            Some(caller) => dir_matches(recorded, caller),
            None => true,
        }
    }
}

/// True when `recorded` equals `caller` or is an ancestor-prefix of it.
pub fn dir_matches(recorded: &Path, caller: &Path) -> bool {
    caller.starts_with(recorded)
}

#[cfg(test)]
#[path = "scope_tests.rs"]
mod tests;
