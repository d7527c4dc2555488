//! CLI argument parsing via clap.

use crate::build_info;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Bridge a document host to protocol clients and chat models.
#[derive(Debug, Parser)]
#[command(name = "docbridge", version = build_info::VERSION, long_version = build_info::LONG_VERSION)]
pub struct Args {
    /// Path to config file (default: ./docbridge.toml or ~/.config/docbridge/docbridge.toml).
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Override the listen address (host:port).
    #[arg(long = "bind", global = true)]
    pub bind: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Run the JSON-RPC server (default).
    Serve,
    /// Run one chat turn against the configured model, with tools.
    Chat {
        /// Prompt words; joined with spaces.
        #[arg(required = true, num_args = 1..)]
        prompt: Vec<String>,
    },
}

impl Args {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve)
    }
}
