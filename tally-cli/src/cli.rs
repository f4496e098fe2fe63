use clap::{Parser, Subcommand};
use tally_core::TaskStatus;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

#[derive(Debug, Parser)]
#[command(name = "tally")]
#[command(about = "Track time against a tree of tasks")]
pub struct Cli {
    /// Run against an in-memory demo backend instead of the configured server
    #[arg(long, global = true)]
    pub dev: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show the task tree
    List {
        /// Only tasks with this status (open, in-progress, done), plus their parents
        #[arg(long)]
        status: Option<TaskStatus>,
        /// Only tasks whose title or description contains this text
        #[arg(long)]
        search: Option<String>,
        /// Expand every node
        #[arg(long)]
        all: bool,
    },
    /// Create a task
    Add {
        title: String,
        #[arg(long)]
        parent: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /// Due date as RFC 3339, e.g. 2024-06-01T17:00:00Z
        #[arg(long, value_parser = parse_due)]
        due: Option<OffsetDateTime>,
    },
    /// Change a task's title or description
    Edit {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Move a task to another status
    Move { id: String, status: TaskStatus },
    /// Start the timer on a task
    Start { id: String },
    /// Pause the timer on a task
    Pause { id: String },
    /// Print the time spent on a task
    Elapsed { id: String },
    /// Delete a task and all of its subtasks
    Rm { id: String },
    /// Expand or collapse a task in `list`
    Toggle { id: String },
    /// Reconcile with the server
    Sync {
        /// Also upload tasks created while offline
        #[arg(long)]
        push: bool,
    },
    /// Show a live timer for a task until Ctrl-C
    Watch { id: String },
    /// Store an API token and sync
    Login {
        #[arg(long)]
        token: String,
    },
    /// Forget the stored API token
    Logout,
    /// Print config path and create default file if missing
    ConfigPath,
}

fn parse_due(raw: &str) -> Result<OffsetDateTime, String> {
    OffsetDateTime::parse(raw, &Rfc3339).map_err(|e| format!("expected an RFC 3339 date: {e}"))
}
