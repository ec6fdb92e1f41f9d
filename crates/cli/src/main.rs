// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! dw - Dev Warden CLI

use anyhow::Result;
use clap::{Parser, Subcommand};

use dw::commands::{daemon, proc, run, session};

#[derive(Parser)]
#[command(
    name = "dw",
    version,
    about = "Dev Warden - supervises dev processes for your coding sessions"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a managed process
    Run(run::RunArgs),
    /// Inspect and control managed processes
    Proc(proc::ProcArgs),
    /// Session registry and scheduled messages
    Session(session::SessionArgs),
    /// Daemon lifecycle
    Daemon(daemon::DaemonArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run::handle(args).await,
        Commands::Proc(args) => proc::handle(args).await,
        Commands::Session(args) => session::handle(args).await,
        Commands::Daemon(args) => daemon::handle(args).await,
    }
}
