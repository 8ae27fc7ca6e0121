//! CLI module - Command-line interface for diskform
//!
//! This module provides a structured CLI using clap for argument parsing.

mod commands;

use clap::{Parser, Subcommand};

/// diskform - export web forms to a Yandex Disk spreadsheet
#[derive(Parser)]
#[command(name = "diskform")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP server (default)
    #[command(alias = "daemon")]
    Serve,

    /// Create default config file
    #[command(alias = "--init")]
    Init,

    /// Issue API keys to every user that has none and print them
    IssueKeys,

    /// Issue a fresh API key to one user
    IssueKey {
        /// Email of the user
        email: String,
    },
}

pub use commands::*;
