//! Downstream score submission.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::QueueError;
use crate::ids::{ItemId, QueueId, WorkerId};
use crate::item::{Item, ObjectType};

/// A score as supplied by the annotator on completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreInput {
    pub name: String,
    pub value: f64,
    #[serde(default)]
    pub comment: Option<String>,
}

impl ScoreInput {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            comment: None,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

/// A score tied to the annotated object, ready for the scoring sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub name: String,
    pub value: f64,
    pub comment: Option<String>,
    pub object_id: String,
    pub object_type: ObjectType,
    pub queue_id: QueueId,
    pub item_id: ItemId,
    pub annotator: WorkerId,
}

impl ScoreRecord {
    /// Attach `input` to the object behind `item`.
    pub fn for_item(item: &Item, annotator: &WorkerId, input: ScoreInput) -> Self {
        Self {
            name: input.name,
            value: input.value,
            comment: input.comment,
            object_id: item.object_id.clone(),
            object_type: item.object_type,
            queue_id: item.queue_id,
            item_id: item.id,
            annotator: annotator.clone(),
        }
    }
}

/// Accepts batches of score records.
#[async_trait]
pub trait ScoreSink: Send + Sync {
    /// Submit a batch.
    async fn submit(&self, records: Vec<ScoreRecord>) -> Result<(), QueueError>;
}

/// Discards every record.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopScoreSink;

#[async_trait]
impl ScoreSink for NoopScoreSink {
    async fn submit(&self, _records: Vec<ScoreRecord>) -> Result<(), QueueError> {
        Ok(())
    }
}

/// Writes each record to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogScoreSink;

#[async_trait]
impl ScoreSink for LogScoreSink {
    async fn submit(&self, records: Vec<ScoreRecord>) -> Result<(), QueueError> {
        for record in &records {
            info!(
                item_id = %record.item_id,
                object_id = %record.object_id,
                object_type = %record.object_type,
                annotator = %record.annotator,
                score = %record.name,
                value = record.value,
                "score submitted"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::item::NewItem;

    #[test]
    fn test_record_for_item() {
        let item = NewItem::new("span-9", ObjectType::Span).into_item(QueueId::new(), Utc::now());
        let annotator = WorkerId::new("ann");
        let record = ScoreRecord::for_item(
            &item,
            &annotator,
            ScoreInput::new("accuracy", 0.75).with_comment("mostly right"),
        );
        assert_eq!(record.object_id, "span-9");
        assert_eq!(record.object_type, ObjectType::Span);
        assert_eq!(record.item_id, item.id);
        assert_eq!(record.annotator, annotator);
        assert_eq!(record.comment.as_deref(), Some("mostly right"));
    }

    #[tokio::test]
    async fn test_builtin_sinks_accept_batches() {
        let item = NewItem::new("t", ObjectType::Trace).into_item(QueueId::new(), Utc::now());
        let records = vec![ScoreRecord::for_item(&item, &WorkerId::new("a"), ScoreInput::new("q", 1.0))];
        NoopScoreSink.submit(records.clone()).await.unwrap();
        LogScoreSink.submit(records).await.unwrap();
    }
}
