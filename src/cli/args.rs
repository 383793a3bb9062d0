//! CLI argument definitions using clap
//!
//! Commands:
//! - qindex explain --schema <path> --collection <name> [--request <path>]
//! - qindex query --schema <path> --collection <name> --fixture <path> [--request <path>]

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// qindex - filter compiler and live-query engine for document indexes
#[derive(Parser, Debug)]
#[command(name = "qindex")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to a query configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "qindex=info")]
    pub log: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compile a request and print the query text and bound parameters
    Explain {
        /// Schema declaration file
        #[arg(long)]
        schema: PathBuf,

        /// Collection the request targets
        #[arg(long)]
        collection: String,

        /// Request file; stdin when omitted
        #[arg(long)]
        request: Option<PathBuf>,
    },

    /// Run a request against a JSON fixture held in memory
    Query {
        /// Schema declaration file
        #[arg(long)]
        schema: PathBuf,

        /// Collection the request targets
        #[arg(long)]
        collection: String,

        /// Fixture file with documents and indexes per collection
        #[arg(long)]
        fixture: PathBuf,

        /// Request file; stdin when omitted
        #[arg(long)]
        request: Option<PathBuf>,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
