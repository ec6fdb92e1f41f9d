// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `dw daemon` - daemon lifecycle commands.

use anyhow::Result;
use clap::{Args, Subcommand};

use super::{client_for_action, client_for_query, print_json};

#[derive(Args)]
pub struct DaemonArgs {
    #[command(subcommand)]
    command: DaemonCommand,
}

#[derive(Subcommand)]
enum DaemonCommand {
    /// Start the daemon if it is not already running
    Start,
    /// Ask the daemon to shut down gracefully
    Stop,
    /// Show daemon status
    Status,
    /// Check daemon liveness
    Ping,
}

pub async fn handle(args: DaemonArgs) -> Result<()> {
    match args.command {
        DaemonCommand::Start => {
            let client = client_for_action().await?;
            let info = client.info().await?;
            println!("daemon running (version {}, uptime {})", info.version,
                dw_core::format_elapsed(info.uptime_seconds));
            Ok(())
        }
        DaemonCommand::Stop => {
            let client = client_for_query().await?;
            client.shutdown().await?;
            println!("shutdown requested");
            Ok(())
        }
        DaemonCommand::Status => {
            let client = client_for_query().await?;
            print_json(&client.info().await?)
        }
        DaemonCommand::Ping => {
            let client = client_for_query().await?;
            client.ping().await?;
            println!("pong");
            Ok(())
        }
    }
}
