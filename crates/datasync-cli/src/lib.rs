//! Datasync CLI Library
//!
//! Operator command line for a running Datasync server.
//!
//! # Overview
//!
//! - **Workflows**: start runs from a JSON input file, list them, read their
//!   status and steer them (`datasync workflow ...`)
//! - **Catalog**: show what discovery found for a connection (`datasync catalog`)
//! - **Quality**: show the latest quality report (`datasync report`)
//! - **Health**: check the server and its database (`datasync health`)
//!
//! Every command talks to the server's HTTP API; `--json` prints the raw
//! response payload instead of the formatted view.

pub mod api;
pub mod commands;
pub mod error;
pub mod output;

pub use error::{CliError, Result};

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

/// Default server URL when neither `--server-url` nor `DATASYNC_SERVER_URL` is set
pub const DEFAULT_SERVER_URL: &str = "http://localhost:8080";

/// Datasync - ETL workflow orchestration
#[derive(Parser, Debug)]
#[command(name = "datasync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print raw JSON instead of formatted output
    #[arg(long, global = true)]
    pub json: bool,

    /// Server URL
    #[arg(long, env = "DATASYNC_SERVER_URL", default_value = DEFAULT_SERVER_URL, global = true)]
    pub server_url: String,

    /// Print the command reference as markdown
    #[arg(long, hide = true)]
    pub markdown_help: bool,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start and control workflow runs
    Workflow {
        #[command(subcommand)]
        command: WorkflowCommand,
    },

    /// Show the discovered catalog of a connection
    Catalog {
        /// Connection id
        connection_id: Uuid,
    },

    /// Show the latest quality report of a connection
    Report {
        /// Connection id
        connection_id: Uuid,
    },

    /// Check server health
    Health,
}

/// Workflow subcommands
#[derive(Subcommand, Debug)]
pub enum WorkflowCommand {
    /// Start a workflow from a JSON input file
    Start {
        /// Path to the workflow input (connection, kind, options)
        #[arg(short, long)]
        file: PathBuf,

        /// Follow the run until it finishes
        #[arg(short, long)]
        watch: bool,
    },

    /// Show the status of a workflow
    Status {
        /// Workflow id
        id: String,
    },

    /// List live and recent workflow runs
    List {
        /// Maximum number of runs to show
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Follow a workflow until it finishes
    Watch {
        /// Workflow id
        id: String,

        /// Polling interval in milliseconds
        #[arg(long, default_value = "1000")]
        interval_ms: u64,
    },

    /// Pause a running workflow at its next table boundary
    Pause {
        /// Workflow id
        id: String,
    },

    /// Resume a paused workflow
    Resume {
        /// Workflow id
        id: String,
    },

    /// Cancel a workflow
    Cancel {
        /// Workflow id
        id: String,
    },
}
