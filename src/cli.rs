//! CLI definitions for annoqueue.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use annoqueue_workqueue::{
    AssignmentRole, ItemId, ItemStatus, ObjectType, ProjectId, QueueId, QueueStatus, ScoreInput,
    WorkerId,
};

/// annoqueue CLI.
#[derive(Parser)]
#[command(name = "annoqueue")]
#[command(about = "Shared annotation queues with claim-next and lease expiry")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "annoqueue.toml", env = "ANNOQUEUE_CONFIG", global = true)]
    pub config: PathBuf,

    /// Database path (overrides the configured one)
    #[arg(long, global = true)]
    pub database: Option<PathBuf>,

    /// Output format (table, json)
    #[arg(long, default_value = "table", global = true)]
    pub format: String,

    #[command(subcommand)]
    pub command: Commands,
}

/// Project and queue addressed by a command.
#[derive(Args, Clone, Copy)]
pub(crate) struct ScopeArgs {
    /// Project ID
    #[arg(long)]
    pub project: ProjectId,

    /// Queue ID
    #[arg(long)]
    pub queue: QueueId,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run the lease expiry sweeper
    Sweep {
        /// Run a single pass and exit
        #[arg(long)]
        once: bool,
    },

    /// Queue management commands
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },

    /// Item management commands
    Item {
        #[command(subcommand)]
        action: ItemAction,
    },

    /// Claim the next item for a worker
    Claim {
        #[command(flatten)]
        scope: ScopeArgs,

        /// Worker (user) ID
        #[arg(long)]
        worker: WorkerId,

        /// Item to pass over (repeatable)
        #[arg(long)]
        exclude: Vec<ItemId>,
    },

    /// Complete an item
    Complete {
        #[command(flatten)]
        scope: ScopeArgs,

        /// Item ID
        #[arg(long)]
        item: ItemId,

        /// Worker (user) ID
        #[arg(long)]
        worker: WorkerId,

        /// Score as name=value (repeatable)
        #[arg(long = "score", value_parser = parse_score)]
        scores: Vec<ScoreInput>,
    },

    /// Skip an item
    Skip {
        #[command(flatten)]
        scope: ScopeArgs,

        /// Item ID
        #[arg(long)]
        item: ItemId,

        /// Worker (user) ID
        #[arg(long)]
        worker: WorkerId,

        /// Why the item was skipped (logged only)
        #[arg(long)]
        reason: Option<String>,
    },

    /// Release a held lock without finishing the item
    Release {
        #[command(flatten)]
        scope: ScopeArgs,

        /// Item ID
        #[arg(long)]
        item: ItemId,

        /// Worker (user) ID
        #[arg(long)]
        worker: WorkerId,
    },

    /// Show queue statistics
    Stats {
        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// Grant a worker a role on a queue
    Assign {
        #[command(flatten)]
        scope: ScopeArgs,

        /// Worker (user) ID
        #[arg(long)]
        worker: WorkerId,

        /// Role (annotator, reviewer, admin)
        #[arg(long, default_value = "annotator")]
        role: AssignmentRole,
    },

    /// Revoke a worker's assignment
    Unassign {
        #[command(flatten)]
        scope: ScopeArgs,

        /// Worker (user) ID
        #[arg(long)]
        worker: WorkerId,
    },
}

#[derive(Subcommand)]
pub(crate) enum QueueAction {
    /// Create a queue
    Create {
        /// Project ID
        #[arg(long)]
        project: ProjectId,

        /// Queue name (unique per project)
        #[arg(long)]
        name: String,

        /// Description
        #[arg(long)]
        description: Option<String>,

        /// Lease duration in seconds
        #[arg(long)]
        lease_secs: Option<i64>,

        /// Assign workers automatically on their first claim
        #[arg(long)]
        auto_assign: bool,
    },

    /// List a project's queues
    List {
        /// Project ID
        #[arg(long)]
        project: ProjectId,
    },

    /// Show or change a queue's status
    Status {
        #[command(flatten)]
        scope: ScopeArgs,

        /// New status (active, paused, archived)
        #[arg(long)]
        set: Option<QueueStatus>,
    },

    /// Change a queue's lease duration
    Lease {
        #[command(flatten)]
        scope: ScopeArgs,

        /// Lease duration in seconds
        #[arg(long)]
        secs: i64,
    },

    /// Delete a queue with its items and assignments
    Delete {
        #[command(flatten)]
        scope: ScopeArgs,
    },
}

#[derive(Subcommand)]
pub(crate) enum ItemAction {
    /// Add items to a queue
    Add {
        #[command(flatten)]
        scope: ScopeArgs,

        /// Object IDs to enqueue
        #[arg(required = true)]
        object_ids: Vec<String>,

        /// Object type (trace, span)
        #[arg(long, default_value = "trace")]
        object_type: ObjectType,

        /// Priority (higher is served first)
        #[arg(long, default_value_t = 0)]
        priority: i32,
    },

    /// List items in claim order
    List {
        #[command(flatten)]
        scope: ScopeArgs,

        /// Filter by status (pending, completed, skipped)
        #[arg(long)]
        status: Option<ItemStatus>,

        /// Maximum number of items
        #[arg(long)]
        limit: Option<usize>,

        /// Items to skip
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },

    /// Delete an item regardless of its state
    Delete {
        #[command(flatten)]
        scope: ScopeArgs,

        /// Item ID
        #[arg(long)]
        item: ItemId,
    },
}

/// Parse `name=value` into a score.
fn parse_score(s: &str) -> Result<ScoreInput, String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{}'", s))?;
    let value: f64 = value
        .parse()
        .map_err(|e| format!("invalid score value '{}': {}", value, e))?;
    if name.trim().is_empty() {
        return Err("score name cannot be empty".to_string());
    }
    Ok(ScoreInput::new(name.trim(), value))
}
