// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CLI subcommands, each a thin mapping onto one protocol verb.

pub mod daemon;
pub mod proc;
pub mod run;
pub mod session;

use crate::client::{ClientConfig, DaemonClient};
use anyhow::Result;

/// Connect for a state-changing command, auto-starting the daemon.
pub(crate) async fn client_for_action() -> Result<DaemonClient> {
    Ok(DaemonClient::connect_or_start(ClientConfig::from_env()).await?)
}

/// Connect for a read-only command; a missing daemon is an error.
pub(crate) async fn client_for_query() -> Result<DaemonClient> {
    Ok(DaemonClient::connect(ClientConfig::from_env()).await?)
}

/// Print a value as pretty JSON on stdout.
pub(crate) fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
