//! Queue definition and status.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use annoqueue_config::{DEFAULT_LEASE_SECS, MAX_LEASE_SECS};

use crate::error::QueueError;
use crate::ids::{ProjectId, QueueId};

/// Queue status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    /// Serving claims.
    Active,
    /// Temporarily closed to claims.
    Paused,
    /// Retired.
    Archived,
}

impl Default for QueueStatus {
    fn default() -> Self {
        QueueStatus::Active
    }
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Active => "active",
            QueueStatus::Paused => "paused",
            QueueStatus::Archived => "archived",
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(QueueStatus::Active),
            "paused" => Ok(QueueStatus::Paused),
            "archived" => Ok(QueueStatus::Archived),
            other => Err(QueueError::InvalidInput(format!("unknown queue status '{other}'"))),
        }
    }
}

/// Resolve a configured lease, falling back when unset or non-positive.
///
/// The result never exceeds `MAX_LEASE_SECS`, whatever was stored.
pub fn effective_lease_secs(configured: i64, fallback: i64) -> i64 {
    let secs = if configured > 0 {
        configured
    } else if fallback > 0 {
        fallback
    } else {
        DEFAULT_LEASE_SECS
    };
    secs.min(MAX_LEASE_SECS)
}

/// Accept a lease of zero (use the default) up to `MAX_LEASE_SECS`.
pub fn validate_lease_secs(secs: i64) -> Result<(), QueueError> {
    if !(0..=MAX_LEASE_SECS).contains(&secs) {
        return Err(QueueError::InvalidInput(format!(
            "lease must be between 0 and {MAX_LEASE_SECS} seconds, got {secs}"
        )));
    }
    Ok(())
}

/// A named container of work items scoped to a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Queue {
    pub id: QueueId,
    pub project_id: ProjectId,
    /// Unique within the project.
    pub name: String,
    pub description: Option<String>,
    pub status: QueueStatus,
    /// Lease length in seconds. Zero or negative means "use the default".
    pub lease_duration_secs: i64,
    /// Carried for the surrounding system; the claim path ignores it.
    pub auto_assign: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Queue {
    pub fn is_active(&self) -> bool {
        self.status == QueueStatus::Active
    }

    /// Lease duration to apply to this queue's items.
    pub fn lease_duration(&self, fallback_secs: i64) -> Duration {
        Duration::seconds(effective_lease_secs(self.lease_duration_secs, fallback_secs))
    }
}

/// Parameters for creating a queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewQueue {
    pub project_id: ProjectId,
    pub name: String,
    pub description: Option<String>,
    pub lease_duration_secs: i64,
    pub auto_assign: bool,
}

impl NewQueue {
    /// Create queue parameters with the default lease.
    pub fn new(project_id: ProjectId, name: impl Into<String>) -> Self {
        Self {
            project_id,
            name: name.into(),
            description: None,
            lease_duration_secs: DEFAULT_LEASE_SECS,
            auto_assign: false,
        }
    }

    /// Set the lease duration in seconds.
    pub fn with_lease_secs(mut self, secs: i64) -> Self {
        self.lease_duration_secs = secs;
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the auto-assignment flag.
    pub fn with_auto_assign(mut self, auto_assign: bool) -> Self {
        self.auto_assign = auto_assign;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), QueueError> {
        if self.name.trim().is_empty() {
            return Err(QueueError::InvalidInput("queue name cannot be empty".to_string()));
        }
        validate_lease_secs(self.lease_duration_secs)
    }

    /// Build the stored queue.
    pub fn into_queue(self, now: DateTime<Utc>) -> Queue {
        Queue {
            id: QueueId::new(),
            project_id: self.project_id,
            name: self.name,
            description: self.description,
            status: QueueStatus::Active,
            lease_duration_secs: self.lease_duration_secs,
            auto_assign: self.auto_assign,
            created_at: now,
            updated_at: now,
        }
    }
}
