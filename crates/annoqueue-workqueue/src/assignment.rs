//! Queue assignments and roles.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::QueueError;
use crate::ids::{QueueId, WorkerId};

/// Assignment role. Ordered by privilege.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentRole {
    Annotator = 0,
    Reviewer = 1,
    Admin = 2,
}

impl AssignmentRole {
    /// Whether this role grants at least `minimum`.
    pub fn satisfies(&self, minimum: AssignmentRole) -> bool {
        *self >= minimum
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentRole::Annotator => "annotator",
            AssignmentRole::Reviewer => "reviewer",
            AssignmentRole::Admin => "admin",
        }
    }
}

impl fmt::Display for AssignmentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssignmentRole {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "annotator" => Ok(AssignmentRole::Annotator),
            "reviewer" => Ok(AssignmentRole::Reviewer),
            "admin" => Ok(AssignmentRole::Admin),
            other => Err(QueueError::InvalidInput(format!("unknown role '{other}'"))),
        }
    }
}

/// Authorization record for one worker on one queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub queue_id: QueueId,
    pub worker: WorkerId,
    pub role: AssignmentRole,
    pub created_at: DateTime<Utc>,
}
