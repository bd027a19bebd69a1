//! Command-line interface definitions using clap derive API.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Dual orchestrator CLI
#[derive(Parser)]
#[command(name = "dual-orchestrator-cli")]
#[command(about = "Adaptive provider routing with shared learning, workflows and session memory")]
#[command(version)]
pub struct Cli {
    /// Settings file layered over the embedded defaults
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run an in-process scenario against built-in providers and print the report as JSON
    Demo {
        /// Number of routing rounds per agent
        #[arg(long, default_value_t = 5)]
        rounds: usize,

        /// Print compact JSON instead of pretty-printed
        #[arg(long)]
        compact: bool,
    },
    /// Print the effective settings as TOML
    Config,
}
