// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `dw run` - start a managed process.

use std::io::Write;
use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use dw_daemon::{RunMode, RunRequest};

use super::{client_for_action, print_json};

#[derive(Args)]
pub struct RunArgs {
    /// Process id, unique per directory
    id: String,

    /// Command to run (use --raw for a shell line)
    #[arg(required_unless_present_any = ["raw", "script"])]
    command: Option<String>,

    /// Arguments for the command
    #[arg(trailing_var_arg = true)]
    args: Vec<String>,

    /// Working directory (defaults to the current directory)
    #[arg(short = 'C', long = "dir")]
    directory: Option<PathBuf>,

    /// Run a raw shell line instead of a command
    #[arg(long, conflicts_with = "command")]
    raw: Option<String>,

    /// Run an npm script by name
    #[arg(long, conflicts_with_all = ["command", "raw"])]
    script: Option<String>,

    /// Reuse an existing healthy process with the same id
    #[arg(long)]
    reuse: bool,

    /// Wait for the process to exit before returning
    #[arg(long)]
    wait: bool,

    /// Wait and print the raw combined output
    #[arg(long, conflicts_with = "wait")]
    raw_output: bool,
}

pub async fn handle(args: RunArgs) -> Result<()> {
    let directory = match args.directory {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    let mode = if args.raw_output {
        RunMode::ForegroundRaw
    } else if args.wait {
        RunMode::Foreground
    } else {
        RunMode::Background
    };

    let req = RunRequest {
        id: args.id,
        path: directory,
        mode,
        script_name: args.script,
        raw: args.raw,
        command: args.command,
        args: args.args,
        env: None,
        reuse: args.reuse,
        buffer_size: None,
        labels: Default::default(),
    };

    let client = client_for_action().await?;
    if matches!(mode, RunMode::ForegroundRaw) {
        let output = client.run_raw(&req).await?;
        std::io::stdout().write_all(&output)?;
        Ok(())
    } else {
        print_json(&client.run_json(&req).await?)
    }
}
