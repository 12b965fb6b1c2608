//! SQLite store.
//!
//! One `tokio_rusqlite::Connection` per store; several stores (or processes)
//! may open the same database file. Claim atomicity comes from SQLite itself:
//! the select-and-lock is one `UPDATE ... WHERE seq = (SELECT ...)` inside a
//! `BEGIN IMMEDIATE` transaction, so only one writer can run it at a time and
//! a second claimer sees the first one's lock.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{OptionalExtension, Row, TransactionBehavior, params, params_from_iter};
use tokio_rusqlite::Connection;
use tracing::debug;

use crate::assignment::{Assignment, AssignmentRole};
use crate::error::QueueError;
use crate::ids::{ItemId, ProjectId, QueueId, WorkerId};
use crate::item::{Item, ItemFilter, NewItem, expiry_cutoff};
use crate::queue::{NewQueue, Queue, QueueStatus, validate_lease_secs};
use crate::sqlite_schema::init_schema;
use crate::stats::QueueStats;
use crate::store::{AccessGate, ClaimRequest, ItemStore, LockSnapshot, QueueDirectory, TransitionRequest};

const ITEM_COLUMNS: &str = "id, queue_id, object_id, object_type, status, priority, locked_at_ms, \
     locked_by, annotator, completed_at_ms, metadata, created_at_ms, updated_at_ms";

const QUEUE_COLUMNS: &str = "id, project_id, name, description, status, lease_duration_secs, \
     auto_assign, created_at_ms, updated_at_ms";

const CLAIM_ORDER: &str = "priority DESC, created_at_ms ASC, seq ASC";

/// SQLite-backed store.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) a database file.
    pub async fn open(path: impl AsRef<Path>, busy_timeout: StdDuration) -> Result<Self, QueueError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| QueueError::Database(format!("create {}: {e}", parent.display())))?;
        }
        let conn = Connection::open(&path).await?;
        conn.call(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            init_schema(conn)
        })
        .await?;

        debug!("SqliteStore opened at {:?}", path);
        Ok(Self { conn })
    }

    /// Create a private in-memory database.
    pub async fn in_memory() -> Result<Self, QueueError> {
        let conn = Connection::open_in_memory().await?;
        conn.call(|conn| {
            conn.pragma_update(None, "foreign_keys", "ON")?;
            init_schema(conn)
        })
        .await?;
        Ok(Self { conn })
    }
}

fn to_ms(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

fn conversion_error(idx: usize, ty: Type, err: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, Box::new(err))
}

fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_error(idx, Type::Text, e))
}

fn time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(idx)?;
    DateTime::from_timestamp_millis(ms).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, format!("timestamp {ms} out of range").into())
    })
}

fn optional_time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<i64>>(idx)? {
        Some(_) => time_column(row, idx).map(Some),
        None => Ok(None),
    }
}

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<Item> {
    let metadata: String = row.get(10)?;
    Ok(Item {
        id: parse_column(row, 0)?,
        queue_id: parse_column(row, 1)?,
        object_id: row.get(2)?,
        object_type: parse_column(row, 3)?,
        status: parse_column(row, 4)?,
        priority: row.get(5)?,
        locked_at: optional_time_column(row, 6)?,
        locked_by: row.get::<_, Option<String>>(7)?.map(WorkerId::from),
        annotator: row.get::<_, Option<String>>(8)?.map(WorkerId::from),
        completed_at: optional_time_column(row, 9)?,
        metadata: serde_json::from_str(&metadata).map_err(|e| conversion_error(10, Type::Text, e))?,
        created_at: time_column(row, 11)?,
        updated_at: time_column(row, 12)?,
    })
}

fn queue_from_row(row: &Row<'_>) -> rusqlite::Result<Queue> {
    Ok(Queue {
        id: parse_column(row, 0)?,
        project_id: parse_column(row, 1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        status: parse_column(row, 4)?,
        lease_duration_secs: row.get(5)?,
        auto_assign: row.get(6)?,
        created_at: time_column(row, 7)?,
        updated_at: time_column(row, 8)?,
    })
}

fn assignment_from_row(row: &Row<'_>) -> rusqlite::Result<Assignment> {
    Ok(Assignment {
        queue_id: parse_column(row, 0)?,
        worker: WorkerId::new(row.get::<_, String>(1)?),
        role: parse_column(row, 2)?,
        created_at: time_column(row, 3)?,
    })
}

/// Load a queue and enforce the project scope.
fn scoped_queue(
    conn: &rusqlite::Connection,
    queue_id: QueueId,
    project_id: ProjectId,
) -> Result<Queue, tokio_rusqlite::Error> {
    let queue = conn
        .query_row(
            &format!("SELECT {QUEUE_COLUMNS} FROM queues WHERE id = ?1"),
            [queue_id.to_string()],
            queue_from_row,
        )
        .optional()?
        .ok_or(QueueError::QueueNotFound(queue_id))?;
    if queue.project_id != project_id {
        return Err(QueueError::ProjectMismatch {
            queue: queue_id,
            project: project_id,
        }
        .into());
    }
    Ok(queue)
}

/// Eligibility filter shared by claim and candidate listing.
///
/// Binds `?1` worker, `?2` queue, `?3` expiry cutoff, then the excluded ids
/// from `?4` on.
fn eligible_clause(request: &ClaimRequest) -> (String, Vec<Value>) {
    let mut sql = String::from(
        "queue_id = ?2 AND status = 'pending' \
         AND (locked_at_ms IS NULL OR locked_at_ms <= ?3 OR locked_by = ?1)",
    );
    let mut values = vec![
        Value::Text(request.worker.as_str().to_string()),
        Value::Text(request.queue_id.to_string()),
        Value::Integer(to_ms(request.expiry_cutoff())),
    ];
    if !request.excluded.is_empty() {
        let placeholders: Vec<String> = (0..request.excluded.len())
            .map(|i| format!("?{}", values.len() + 1 + i))
            .collect();
        sql.push_str(&format!(" AND id NOT IN ({})", placeholders.join(", ")));
        values.extend(request.excluded.iter().map(|id| Value::Text(id.to_string())));
    }
    (sql, values)
}

#[async_trait]
impl ItemStore for SqliteStore {
    async fn insert_items(
        &self,
        queue_id: QueueId,
        items: Vec<NewItem>,
        now: DateTime<Utc>,
    ) -> Result<usize, QueueError> {
        let mut rows = Vec::with_capacity(items.len());
        for new_item in items {
            let metadata = serde_json::to_string(&new_item.metadata)
                .map_err(|e| QueueError::InvalidInput(format!("metadata: {e}")))?;
            rows.push((new_item, metadata));
        }

        let inserted = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let exists = tx
                    .query_row("SELECT 1 FROM queues WHERE id = ?1", [queue_id.to_string()], |_| Ok(()))
                    .optional()?
                    .is_some();
                if !exists {
                    return Err(QueueError::QueueNotFound(queue_id).into());
                }

                let mut inserted = 0;
                {
                    let mut stmt = tx.prepare(
                        "INSERT OR IGNORE INTO items
                         (id, queue_id, object_id, object_type, status, priority, metadata, created_at_ms, updated_at_ms)
                         VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?6, ?7, ?7)",
                    )?;
                    for (new_item, metadata) in rows {
                        inserted += stmt.execute(params![
                            ItemId::new().to_string(),
                            queue_id.to_string(),
                            new_item.object_id,
                            new_item.object_type.as_str(),
                            new_item.priority,
                            metadata,
                            to_ms(now),
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(inserted)
            })
            .await?;
        Ok(inserted)
    }

    async fn get_item(&self, id: ItemId) -> Result<Option<Item>, QueueError> {
        let item = self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        &format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = ?1"),
                        [id.to_string()],
                        item_from_row,
                    )
                    .optional()?)
            })
            .await?;
        Ok(item)
    }

    async fn list_items(&self, queue_id: QueueId, filter: &ItemFilter) -> Result<Vec<Item>, QueueError> {
        let status = filter.status.map(|s| s.as_str());
        let limit = filter.limit.map(|l| l as i64).unwrap_or(-1);
        let offset = filter.offset as i64;
        let items = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {ITEM_COLUMNS} FROM items
                     WHERE queue_id = ?1 AND (?2 IS NULL OR status = ?2)
                     ORDER BY {CLAIM_ORDER} LIMIT ?3 OFFSET ?4"
                ))?;
                let items = stmt
                    .query_map(params![queue_id.to_string(), status, limit, offset], item_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(items)
            })
            .await?;
        Ok(items)
    }

    async fn find_claimable(&self, request: &ClaimRequest) -> Result<Option<Item>, QueueError> {
        let request = request.clone();
        let claimed = self
            .conn
            .call(move |conn| {
                let (clause, mut values) = eligible_clause(&request);
                let now_idx = values.len() + 1;
                values.push(Value::Integer(to_ms(request.now)));
                let sql = format!(
                    "UPDATE items SET locked_at_ms = ?{now_idx}, locked_by = ?1, updated_at_ms = ?{now_idx}
                     WHERE seq = (SELECT seq FROM items WHERE {clause} ORDER BY {CLAIM_ORDER} LIMIT 1)
                     RETURNING {ITEM_COLUMNS}"
                );

                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let claimed = {
                    let mut stmt = tx.prepare(&sql)?;
                    stmt.query_row(params_from_iter(values), item_from_row).optional()?
                };
                // Dropping the transaction on this error rolls the lock back.
                request.check_deadline()?;
                tx.commit()?;
                Ok(claimed)
            })
            .await?;
        Ok(claimed)
    }

    async fn claim_candidates(&self, request: &ClaimRequest, limit: usize) -> Result<Vec<Item>, QueueError> {
        let request = request.clone();
        let items = self
            .conn
            .call(move |conn| {
                let (clause, mut values) = eligible_clause(&request);
                let limit_idx = values.len() + 1;
                values.push(Value::Integer(limit as i64));
                let mut stmt = conn.prepare(&format!(
                    "SELECT {ITEM_COLUMNS} FROM items WHERE {clause} ORDER BY {CLAIM_ORDER} LIMIT ?{limit_idx}"
                ))?;
                let items = stmt
                    .query_map(params_from_iter(values), item_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(items)
            })
            .await?;
        Ok(items)
    }

    async fn set_lock(
        &self,
        item_id: ItemId,
        expected: &LockSnapshot,
        worker: &WorkerId,
        now: DateTime<Utc>,
    ) -> Result<bool, QueueError> {
        let expected_at = expected.locked_at.map(to_ms);
        let expected_by = expected.locked_by.as_ref().map(|w| w.as_str().to_string());
        let worker = worker.as_str().to_string();
        let changed = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE items SET locked_at_ms = ?1, locked_by = ?2, updated_at_ms = ?1
                     WHERE id = ?3 AND status = 'pending' AND locked_at_ms IS ?4 AND locked_by IS ?5",
                    params![to_ms(now), worker, item_id.to_string(), expected_at, expected_by],
                )?)
            })
            .await?;
        Ok(changed == 1)
    }

    async fn clear_lock(
        &self,
        item_id: ItemId,
        holder: &WorkerId,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<bool, QueueError> {
        let holder = holder.as_str().to_string();
        let cutoff = to_ms(expiry_cutoff(now, lease));
        let changed = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE items SET locked_at_ms = NULL, locked_by = NULL, updated_at_ms = ?1
                     WHERE id = ?2 AND status = 'pending' AND locked_by = ?3 AND locked_at_ms > ?4",
                    params![to_ms(now), item_id.to_string(), holder, cutoff],
                )?)
            })
            .await?;
        Ok(changed == 1)
    }

    async fn transition(&self, request: &TransitionRequest) -> Result<bool, QueueError> {
        let status = request.status.as_str();
        let worker = request.worker.as_str().to_string();
        let now = to_ms(request.now);
        let cutoff = to_ms(expiry_cutoff(request.now, request.lease));
        let item_id = request.item_id.to_string();
        let changed = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE items
                     SET status = ?1, annotator = ?2, completed_at_ms = ?3, updated_at_ms = ?3,
                         locked_at_ms = NULL, locked_by = NULL
                     WHERE id = ?4 AND status = 'pending'
                       AND (locked_at_ms IS NULL OR locked_at_ms <= ?5 OR locked_by = ?2)",
                    params![status, worker, now, item_id, cutoff],
                )?)
            })
            .await?;
        Ok(changed == 1)
    }

    async fn delete_item(&self, id: ItemId) -> Result<bool, QueueError> {
        let changed = self
            .conn
            .call(move |conn| Ok(conn.execute("DELETE FROM items WHERE id = ?1", [id.to_string()])?))
            .await?;
        Ok(changed > 0)
    }

    async fn bulk_clear_expired_locks(
        &self,
        queue_id: QueueId,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<u64, QueueError> {
        let cutoff = to_ms(expiry_cutoff(now, lease));
        let changed = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE items SET locked_at_ms = NULL, locked_by = NULL, updated_at_ms = ?1
                     WHERE queue_id = ?2 AND status = 'pending'
                       AND locked_at_ms IS NOT NULL AND locked_at_ms <= ?3",
                    params![to_ms(now), queue_id.to_string(), cutoff],
                )?)
            })
            .await?;
        Ok(changed as u64)
    }

    async fn stats(&self, queue_id: QueueId, lease: Duration, now: DateTime<Utc>) -> Result<QueueStats, QueueError> {
        let cutoff = to_ms(expiry_cutoff(now, lease));
        let stats = self
            .conn
            .call(move |conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*),
                            COALESCE(SUM(status = 'pending'), 0),
                            COALESCE(SUM(status = 'pending' AND locked_at_ms > ?2), 0),
                            COALESCE(SUM(status = 'completed'), 0),
                            COALESCE(SUM(status = 'skipped'), 0)
                     FROM items WHERE queue_id = ?1",
                    params![queue_id.to_string(), cutoff],
                    |row| {
                        Ok(QueueStats {
                            total: row.get::<_, i64>(0)? as u64,
                            pending: row.get::<_, i64>(1)? as u64,
                            in_progress: row.get::<_, i64>(2)? as u64,
                            completed: row.get::<_, i64>(3)? as u64,
                            skipped: row.get::<_, i64>(4)? as u64,
                        })
                    },
                )?)
            })
            .await?;
        Ok(stats)
    }
}

#[async_trait]
impl QueueDirectory for SqliteStore {
    async fn create_queue(&self, new_queue: NewQueue, now: DateTime<Utc>) -> Result<Queue, QueueError> {
        new_queue.validate()?;
        let queue = new_queue.into_queue(now);
        let row = queue.clone();
        self.conn
            .call(move |conn| {
                let result = conn.execute(
                    "INSERT INTO queues
                     (id, project_id, name, description, status, lease_duration_secs, auto_assign, created_at_ms, updated_at_ms)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                    params![
                        row.id.to_string(),
                        row.project_id.to_string(),
                        row.name,
                        row.description,
                        row.status.as_str(),
                        row.lease_duration_secs,
                        row.auto_assign,
                        to_ms(row.created_at),
                    ],
                );
                match result {
                    Ok(_) => Ok(()),
                    Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == rusqlite::ErrorCode::ConstraintViolation => {
                        Err(QueueError::DuplicateQueueName {
                            project: row.project_id,
                            name: row.name,
                        }
                        .into())
                    }
                    Err(e) => Err(e.into()),
                }
            })
            .await?;
        Ok(queue)
    }

    async fn get_queue(&self, queue_id: QueueId, project_id: ProjectId) -> Result<Queue, QueueError> {
        let queue = self
            .conn
            .call(move |conn| scoped_queue(conn, queue_id, project_id))
            .await?;
        Ok(queue)
    }

    async fn list_queues(&self, project_id: ProjectId) -> Result<Vec<Queue>, QueueError> {
        let queues = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {QUEUE_COLUMNS} FROM queues WHERE project_id = ?1 ORDER BY name"
                ))?;
                let queues = stmt
                    .query_map([project_id.to_string()], queue_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(queues)
            })
            .await?;
        Ok(queues)
    }

    async fn set_queue_status(
        &self,
        queue_id: QueueId,
        project_id: ProjectId,
        status: QueueStatus,
        now: DateTime<Utc>,
    ) -> Result<Queue, QueueError> {
        let queue = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut queue = scoped_queue(&tx, queue_id, project_id)?;
                tx.execute(
                    "UPDATE queues SET status = ?1, updated_at_ms = ?2 WHERE id = ?3",
                    params![status.as_str(), to_ms(now), queue_id.to_string()],
                )?;
                tx.commit()?;
                queue.status = status;
                queue.updated_at = now;
                Ok(queue)
            })
            .await?;
        Ok(queue)
    }

    async fn set_lease_duration(
        &self,
        queue_id: QueueId,
        project_id: ProjectId,
        lease_secs: i64,
        now: DateTime<Utc>,
    ) -> Result<Queue, QueueError> {
        validate_lease_secs(lease_secs)?;
        let queue = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut queue = scoped_queue(&tx, queue_id, project_id)?;
                tx.execute(
                    "UPDATE queues SET lease_duration_secs = ?1, updated_at_ms = ?2 WHERE id = ?3",
                    params![lease_secs, to_ms(now), queue_id.to_string()],
                )?;
                tx.commit()?;
                queue.lease_duration_secs = lease_secs;
                queue.updated_at = now;
                Ok(queue)
            })
            .await?;
        Ok(queue)
    }

    async fn delete_queue(&self, queue_id: QueueId, project_id: ProjectId) -> Result<(), QueueError> {
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                scoped_queue(&tx, queue_id, project_id)?;
                tx.execute("DELETE FROM queues WHERE id = ?1", [queue_id.to_string()])?;
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn list_active_queues_all_projects(&self) -> Result<Vec<Queue>, QueueError> {
        let queues = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {QUEUE_COLUMNS} FROM queues WHERE status = 'active' ORDER BY created_at_ms"
                ))?;
                let queues = stmt
                    .query_map([], queue_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(queues)
            })
            .await?;
        Ok(queues)
    }
}

#[async_trait]
impl AccessGate for SqliteStore {
    async fn assign(
        &self,
        queue_id: QueueId,
        worker: &WorkerId,
        role: AssignmentRole,
        now: DateTime<Utc>,
    ) -> Result<Assignment, QueueError> {
        let worker = worker.as_str().to_string();
        let assignment = self
            .conn
            .call(move |conn| {
                let exists = conn
                    .query_row("SELECT 1 FROM queues WHERE id = ?1", [queue_id.to_string()], |_| Ok(()))
                    .optional()?
                    .is_some();
                if !exists {
                    return Err(QueueError::QueueNotFound(queue_id).into());
                }
                Ok(conn.query_row(
                    "INSERT INTO assignments (queue_id, worker, role, created_at_ms)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT (queue_id, worker) DO UPDATE SET role = excluded.role
                     RETURNING queue_id, worker, role, created_at_ms",
                    params![queue_id.to_string(), worker, role.as_str(), to_ms(now)],
                    assignment_from_row,
                )?)
            })
            .await?;
        Ok(assignment)
    }

    async fn unassign(&self, queue_id: QueueId, worker: &WorkerId) -> Result<bool, QueueError> {
        let worker = worker.as_str().to_string();
        let changed = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "DELETE FROM assignments WHERE queue_id = ?1 AND worker = ?2",
                    params![queue_id.to_string(), worker],
                )?)
            })
            .await?;
        Ok(changed > 0)
    }

    async fn list_assignments(&self, queue_id: QueueId) -> Result<Vec<Assignment>, QueueError> {
        let assignments = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT queue_id, worker, role, created_at_ms FROM assignments
                     WHERE queue_id = ?1 ORDER BY worker",
                )?;
                let assignments = stmt
                    .query_map([queue_id.to_string()], assignment_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(assignments)
            })
            .await?;
        Ok(assignments)
    }

    async fn check_access(
        &self,
        queue_id: QueueId,
        worker: &WorkerId,
        minimum: AssignmentRole,
    ) -> Result<bool, QueueError> {
        let worker = worker.as_str().to_string();
        let role = self
            .conn
            .call(move |conn| {
                let role: Option<String> = conn
                    .query_row(
                        "SELECT role FROM assignments WHERE queue_id = ?1 AND worker = ?2",
                        params![queue_id.to_string(), worker],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(role)
            })
            .await?;
        match role {
            Some(role) => Ok(AssignmentRole::from_str(&role)?.satisfies(minimum)),
            None => Ok(false),
        }
    }
}

#[cfg(test)]
#[path = "sqlite_store_tests.rs"]
mod tests;
