// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `dw session` - session registry and scheduled messages.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Subcommand};
use dw_core::DirFilter;
use dw_daemon::{RegisterRequest, ScheduleRequest};

use super::{client_for_action, client_for_query, print_json};

#[derive(Args)]
pub struct SessionArgs {
    #[command(subcommand)]
    command: SessionCommand,
}

#[derive(Subcommand)]
enum SessionCommand {
    /// Register a session with its overlay endpoint
    Register {
        /// Overlay socket path messages are delivered to
        #[arg(long)]
        overlay: String,
        /// Explicit session code (generated when omitted)
        #[arg(long)]
        code: Option<String>,
        /// Code base, e.g. the wrapped command name
        #[arg(long)]
        base: Option<String>,
        /// Session directory (defaults to the current directory)
        #[arg(short = 'C', long = "dir")]
        directory: Option<PathBuf>,
    },
    /// Remove a session
    Unregister { code: String },
    /// Refresh a session's heartbeat
    Heartbeat { code: String },
    /// List sessions under a directory
    List {
        #[arg(short = 'C', long = "dir")]
        directory: Option<PathBuf>,
        #[arg(long)]
        global: bool,
    },
    /// Show one session
    Get { code: String },
    /// Deliver a message to a session's overlay now
    Send { code: String, message: String },
    /// Deliver a message after a delay, e.g. `dw session schedule dev-1 5m "stand up"`
    Schedule {
        code: String,
        /// Positive human duration (5m, 1h30m, 200ms)
        duration: String,
        message: String,
    },
    /// Cancel a scheduled message
    Cancel { task_id: String },
    /// List pending scheduled messages
    Tasks {
        #[arg(short = 'C', long = "dir")]
        directory: Option<PathBuf>,
        #[arg(long)]
        global: bool,
    },
    /// Find the session covering a directory
    Find {
        #[arg(default_value = ".")]
        directory: PathBuf,
    },
    /// Find and attach to the session covering a directory
    Attach {
        #[arg(default_value = ".")]
        directory: PathBuf,
    },
}

fn scope(directory: Option<PathBuf>, global: bool) -> Result<DirFilter> {
    if global {
        return Ok(DirFilter::global());
    }
    let dir = match directory {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    Ok(DirFilter::under(dir))
}

pub async fn handle(args: SessionArgs) -> Result<()> {
    match args.command {
        SessionCommand::Register {
            overlay,
            code,
            base,
            directory,
        } => {
            let directory = match directory {
                Some(dir) => dir,
                None => std::env::current_dir()?,
            };
            let client = client_for_action().await?;
            let session = client
                .session_register(&RegisterRequest {
                    code,
                    base,
                    overlay_endpoint: overlay,
                    directory,
                    command: String::new(),
                    args: vec![],
                })
                .await?;
            print_json(&session)
        }
        SessionCommand::Unregister { code } => {
            let client = client_for_query().await?;
            client.session_unregister(&code).await?;
            Ok(())
        }
        SessionCommand::Heartbeat { code } => {
            let client = client_for_query().await?;
            client.session_heartbeat(&code).await?;
            Ok(())
        }
        SessionCommand::List { directory, global } => {
            let client = client_for_query().await?;
            print_json(&client.session_list(&scope(directory, global)?).await?)
        }
        SessionCommand::Get { code } => {
            let client = client_for_query().await?;
            print_json(&client.session_get(&code).await?)
        }
        SessionCommand::Send { code, message } => {
            let client = client_for_query().await?;
            client.session_send(&code, &message).await?;
            Ok(())
        }
        SessionCommand::Schedule {
            code,
            duration,
            message,
        } => {
            let client = client_for_query().await?;
            let scheduled = client
                .session_schedule(&ScheduleRequest {
                    session_code: code,
                    duration,
                    message,
                })
                .await?;
            print_json(&scheduled)
        }
        SessionCommand::Cancel { task_id } => {
            let client = client_for_query().await?;
            client.session_cancel(&task_id).await?;
            Ok(())
        }
        SessionCommand::Tasks { directory, global } => {
            let client = client_for_query().await?;
            print_json(&client.session_tasks(&scope(directory, global)?).await?)
        }
        SessionCommand::Find { directory } => {
            let client = client_for_query().await?;
            print_json(&client.session_find(&directory.canonicalize()?).await?)
        }
        SessionCommand::Attach { directory } => {
            let client = client_for_query().await?;
            print_json(&client.session_attach(&directory.canonicalize()?).await?)
        }
    }
}
