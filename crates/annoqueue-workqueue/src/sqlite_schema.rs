//! Database schema management.

use rusqlite::Connection;
use tokio_rusqlite::Error;

/// Initialize the database schema.
pub(crate) fn init_schema(conn: &Connection) -> Result<(), Error> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

/// Timestamps are unix milliseconds. `seq` (the rowid) is insertion order.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS queues (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    name TEXT NOT NULL,
    description TEXT,
    status TEXT NOT NULL DEFAULT 'active',
    lease_duration_secs INTEGER NOT NULL DEFAULT 300,
    auto_assign INTEGER NOT NULL DEFAULT 0,
    created_at_ms INTEGER NOT NULL,
    updated_at_ms INTEGER NOT NULL,
    UNIQUE (project_id, name)
);

CREATE TABLE IF NOT EXISTS items (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    queue_id TEXT NOT NULL,
    object_id TEXT NOT NULL,
    object_type TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    priority INTEGER NOT NULL DEFAULT 0,
    locked_at_ms INTEGER,
    locked_by TEXT,
    annotator TEXT,
    completed_at_ms INTEGER,
    metadata TEXT NOT NULL DEFAULT 'null',
    created_at_ms INTEGER NOT NULL,
    updated_at_ms INTEGER NOT NULL,
    UNIQUE (queue_id, object_id, object_type),
    FOREIGN KEY (queue_id) REFERENCES queues(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS assignments (
    queue_id TEXT NOT NULL,
    worker TEXT NOT NULL,
    role TEXT NOT NULL,
    created_at_ms INTEGER NOT NULL,
    PRIMARY KEY (queue_id, worker),
    FOREIGN KEY (queue_id) REFERENCES queues(id) ON DELETE CASCADE
);

-- Eligibility scan and claim order
CREATE INDEX IF NOT EXISTS idx_items_claim
    ON items(queue_id, status, locked_at_ms, priority DESC, created_at_ms);
CREATE INDEX IF NOT EXISTS idx_queues_status ON queues(status);
"#;
