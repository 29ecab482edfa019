//! CLI argument definitions for ft.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// ft - durable identities for the scenarios in your feature files.
///
/// Run `ft init` once, then `ft sync` whenever feature files or tests change.
#[derive(Parser, Debug)]
#[command(name = "ft")]
#[command(author, version, about = "Durable scenario identities for plain-text feature files", long_about = None)]
pub struct Cli {
    /// Output in human-readable format instead of JSON
    #[arg(short = 'H', long = "human", global = true)]
    pub human_readable: bool,

    /// Run as if ft was started in <path> instead of the current directory.
    /// Can also be set via FT_REPO environment variable.
    #[arg(short = 'C', long = "repo", global = true, env = "FT_REPO")]
    pub repo_path: Option<PathBuf>,

    /// Directory holding the feature files, relative to the project root
    #[arg(long = "features-dir", global = true, value_name = "DIR")]
    pub features_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the feature directory and database, and ignore the database in git
    Init,

    /// Assign identities, write tags and rebuild test links
    Sync,

    /// Show scenario counts per status, or set the status of one scenario
    ///
    /// Without arguments prints a summary. With an ID and a label, appends
    /// that label to the scenario's status history.
    Status {
        /// Scenario ID (e.g., 12 or @id:12)
        id: Option<String>,

        /// New status label; several words form one label
        #[arg(requires = "id")]
        status: Vec<String>,
    },

    /// List scenarios with their current status
    List {
        /// Only scenarios whose current status equals this label
        #[arg(long)]
        status: Option<String>,

        /// Only scenarios without any status
        #[arg(long, conflicts_with = "status")]
        no_activity: bool,
    },

    /// Show a scenario with its status, history, tests and text
    Show {
        /// Scenario ID (e.g., 12 or @id:12)
        id: String,

        /// Only print the status history
        #[arg(long)]
        history: bool,
    },

    /// List tests linked to a scenario
    Tests {
        /// Scenario ID (e.g., 12 or @id:12)
        id: String,
    },
}
