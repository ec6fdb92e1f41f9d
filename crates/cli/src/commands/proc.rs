// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `dw proc` - inspect and control managed processes.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Subcommand};
use dw_core::DirFilter;
use dw_daemon::{OutputRequest, Response, StreamKind};

use super::{client_for_action, client_for_query, print_json};

#[derive(Args)]
pub struct ProcArgs {
    #[command(subcommand)]
    command: ProcCommand,
}

#[derive(Subcommand)]
enum ProcCommand {
    /// Show one process
    Status { id: String },
    /// Print captured output
    Output {
        id: String,
        /// Stream: stdout, stderr, or combined
        #[arg(long, default_value = "combined")]
        stream: String,
        /// Keep only the last N lines
        #[arg(long)]
        tail: Option<usize>,
        /// Keep only the first N lines
        #[arg(long)]
        head: Option<usize>,
        /// Keep only lines containing this substring
        #[arg(long)]
        grep: Option<String>,
        /// Drop lines containing this substring
        #[arg(long = "grep-v")]
        grep_v: Option<String>,
    },
    /// Stop a process (SIGTERM, then SIGKILL)
    Stop {
        id: String,
        /// Skip the graceful phase
        #[arg(long)]
        force: bool,
    },
    /// List processes under a directory
    List {
        /// Directory scope (defaults to the current directory)
        #[arg(short = 'C', long = "dir")]
        directory: Option<PathBuf>,
        /// List every process regardless of directory
        #[arg(long)]
        global: bool,
    },
    /// Kill unmanaged listeners squatting on a port
    CleanupPort { port: u16 },
}

fn parse_stream(stream: &str) -> Result<StreamKind> {
    match stream {
        "stdout" => Ok(StreamKind::Stdout),
        "stderr" => Ok(StreamKind::Stderr),
        "combined" => Ok(StreamKind::Combined),
        other => anyhow::bail!("unknown stream {other:?} (stdout, stderr, combined)"),
    }
}

pub async fn handle(args: ProcArgs) -> Result<()> {
    match args.command {
        ProcCommand::Status { id } => {
            let client = client_for_query().await?;
            print_json(&client.proc_status(&id).await?)
        }
        ProcCommand::Output {
            id,
            stream,
            tail,
            head,
            grep,
            grep_v,
        } => {
            let client = client_for_query().await?;
            let req = OutputRequest {
                stream: parse_stream(&stream)?,
                tail,
                head,
                grep,
                grep_v,
                directory: None,
            };
            let output = client.proc_output(&id, &req).await?;
            print!("{}", output.output);
            if output.truncated {
                eprintln!("(output truncated: oldest bytes were dropped)");
            }
            Ok(())
        }
        ProcCommand::Stop { id, force } => {
            let client = client_for_query().await?;
            client.proc_stop(&id, force).await?;
            println!("{id} stopped");
            Ok(())
        }
        ProcCommand::List { directory, global } => {
            let filter = if global {
                DirFilter::global()
            } else {
                let dir = match directory {
                    Some(dir) => dir,
                    None => std::env::current_dir()?,
                };
                DirFilter::under(dir)
            };
            let client = client_for_query().await?;
            print_json(&client.proc_list(&filter).await?)
        }
        ProcCommand::CleanupPort { port } => {
            let client = client_for_action().await?;
            match client.cleanup_port(port).await? {
                Response::Json { body } => print_json(&body),
                Response::Ok { message } => {
                    println!("{}", message.unwrap_or_else(|| "ok".into()));
                    Ok(())
                }
                Response::Err { code, message, .. } => {
                    anyhow::bail!("{code}: {message}")
                }
                _ => anyhow::bail!("unexpected response"),
            }
        }
    }
}
