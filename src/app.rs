//! Shared command context: store, engine and output.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};

use annoqueue_config::Config;
use annoqueue_workqueue::{
    AccessGate, AnnotationQueueEngine, AssignmentRole, EngineConfig, LogScoreSink, Queue, QueueDirectory,
    QueueError, QueueScope, SqliteStore, WorkerId,
};

use crate::cli::ScopeArgs;

pub(crate) type CmdResult = Result<(), Box<dyn std::error::Error>>;

/// Everything a command needs.
pub(crate) struct App {
    pub config: Config,
    pub store: Arc<SqliteStore>,
    pub engine: AnnotationQueueEngine,
    json: bool,
}

impl App {
    /// Open the configured database and build the engine over it.
    pub async fn open(config: Config, format: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let path = &config.database.path;
        debug!("Opening database: {}", path.display());
        let store = Arc::new(SqliteStore::open(path, config.database.busy_timeout()).await?);

        let engine = AnnotationQueueEngine::new(store.clone(), store.clone())
            .with_config(EngineConfig::from_config(&config))
            .with_score_sink(Arc::new(LogScoreSink));

        Ok(Self {
            config,
            store,
            engine,
            json: format == "json",
        })
    }

    /// Load the addressed queue.
    pub async fn queue(&self, scope: ScopeArgs) -> Result<Queue, QueueError> {
        self.store.get_queue(scope.queue, scope.project).await
    }

    /// Gate a worker before claim, complete and skip.
    ///
    /// Queues with auto-assignment enroll unknown workers as annotators.
    pub async fn authorize(&self, scope: ScopeArgs, worker: &WorkerId) -> Result<QueueScope, Box<dyn std::error::Error>> {
        let queue = self.queue(scope).await?;
        if self
            .store
            .check_access(queue.id, worker, AssignmentRole::Annotator)
            .await?
        {
            return Ok(QueueScope::from(&queue));
        }
        if queue.auto_assign {
            self.store
                .assign(queue.id, worker, AssignmentRole::Annotator, Utc::now())
                .await?;
            info!("Auto-assigned {} to queue {}", worker, queue.id);
            return Ok(QueueScope::from(&queue));
        }
        Err(format!("{} is not assigned to queue {}", worker, queue.id).into())
    }

    /// Print `value` as JSON, or via `table` in table mode.
    pub fn emit<T: Serialize>(&self, value: &T, table: impl FnOnce(&T)) -> CmdResult {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            table(value);
        }
        Ok(())
    }
}

/// Engine scope for CLI scope arguments.
pub(crate) fn scope_of(args: ScopeArgs) -> QueueScope {
    QueueScope::new(args.project, args.queue)
}
