//
// Copyright 2025 Tabs Data Inc.
//

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// The minibase server CLI.
#[derive(Debug, Parser)]
#[command(name = "minibase", version, about = "Self-hosted backend service")]
pub struct Cli {
    /// Instance directory. Defaults to $MB_INSTANCE, else ~/.minibase.
    #[arg(long, global = true)]
    pub instance: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create the instance layout and bootstrap the admin account.
    Init {
        /// Admin email.
        #[arg(long)]
        email: Option<String>,
        /// Admin password. Prompted from the environment in CI setups.
        #[arg(long)]
        password: Option<String>,
    },
    /// Run the API server and the scheduler.
    Serve {
        /// Re-register changed function sources from the functions directory.
        #[arg(long)]
        reload: bool,
    },
    /// Function tooling.
    Functions {
        #[command(subcommand)]
        command: FunctionsCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum FunctionsCommand {
    /// Scaffold a new function file in the functions directory.
    New {
        /// Function name, snake_case.
        name: String,
        /// Description placed in the scaffold.
        #[arg(short = 'd', long, default_value = "")]
        description: String,
    },
}
