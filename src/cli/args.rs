//! CLI argument definitions using clap

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Personal discipline tracker: commitment-window task chains and round-robin routine trees
#[derive(Parser, Debug)]
#[command(name = "cadence")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable debug output (repeat for more detail)
    #[arg(short = 'd', long = "debug", action = clap::ArgAction::Count, global = true)]
    pub debug: u8,

    /// Override the protocol data file
    #[arg(long, global = true, env = "CADENCE_DATA_FILE")]
    pub data_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage the formula tree
    Formula {
        #[command(subcommand)]
        command: FormulaCommands,
    },

    /// Run the chain-delay protocol
    Chain {
        #[command(subcommand)]
        command: ChainCommands,
    },

    /// Show chain and formula status
    Status,

    /// Manage settings
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Generate shell completions
    Completion {
        /// Shell type
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand, Debug)]
pub enum FormulaCommands {
    /// Add a formula (at most one per day)
    Add {
        /// Display name
        name: String,
        /// Parent formula id (omit for a new root)
        #[arg(short, long)]
        parent: Option<u32>,
    },

    /// Remove a formula and its whole subtree
    Remove {
        id: u32,
        /// Skip the preview and delete
        #[arg(short, long)]
        yes: bool,
    },

    /// Rename a formula
    Rename { id: u32, name: String },

    /// Toggle a formula between active and inactive
    Toggle { id: u32 },

    /// Show the forest as a tree
    Tree,

    /// Show the current tier of every tracked root
    Active,

    /// Advance a tracked root one tier (wraps after the deepest)
    Advance { root_id: u32 },

    /// List active formulas untouched for over a week
    Stale,

    /// Export the node list as JSON
    Export {
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Replace the node list from a JSON file
    Import { file: PathBuf },

    /// Delete every formula
    Clear {
        /// Skip the preview and delete
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum ChainCommands {
    /// Open a reservation window
    Reserve {
        /// Window length in minutes (default from settings)
        #[arg(short, long)]
        minutes: Option<i64>,
    },

    /// Start a task, fulfilling an open reservation
    Start {
        /// Task name
        name: Option<String>,
        /// Window length in minutes (default from settings)
        #[arg(short, long)]
        minutes: Option<i64>,
    },

    /// Complete the running task
    Done,

    /// Abandon the running task window
    Cancel,

    /// Break the chain and archive it
    Reset {
        /// Why the chain broke
        reason: String,
    },

    /// Permanently allow a behavior
    Allow { description: String },

    /// Show window and chain state
    Status,

    /// Show archived chains
    History,

    /// List permanently allowed behaviors
    Violations,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show merged config
    Show,

    /// Show config file path
    Path,
}
