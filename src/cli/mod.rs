//! CLI module - command-line interface for demoarr.
//!
//! Structured CLI using clap for argument parsing.

pub mod commands;

use clap::{Parser, Subcommand};

/// demoarr - game metadata reconciler
/// Aggregates Steam and free-platform game data referenced by videos
#[derive(Parser)]
#[command(name = "demoarr")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run as background daemon with the cycle scheduler
    #[command(alias = "-d", alias = "--daemon")]
    Daemon,

    /// Run a single reconcile cycle
    #[command(alias = "-s", alias = "check")]
    Sync,

    /// List the reconciled game entries
    #[command(alias = "ls", alias = "l")]
    List,

    /// Show details about one catalog entry
    #[command(alias = "i")]
    Info {
        /// Steam app id
        id: String,
    },

    /// List known videos and their resolved game references
    Videos {
        /// Restrict to one video source
        source: Option<String>,
    },

    /// Run the integrity validator and report findings
    Validate,

    /// Create default config file
    #[command(alias = "--init")]
    Init,
}
