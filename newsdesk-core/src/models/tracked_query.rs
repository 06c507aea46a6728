use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub link: String,
    pub snippet: String,
    pub position: u32,
}

/// Source label (article title) to reference, ordered by label.
pub type Sources = BTreeMap<String, SourceRef>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Changes {
    pub new: Option<String>,
    pub removed: Option<String>,
}

impl Changes {
    pub fn is_unchanged(&self) -> bool {
        self.new.is_none() && self.removed.is_none()
    }
}

/// One refresh result. Never mutated once appended to a history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub date: DateTime<Utc>,
    pub summary: String,
    pub sources: Sources,
    pub changes: Changes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedQuery {
    pub query_id: Uuid,
    pub user_id: String,
    pub query_text: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// `None` in the summary view.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<Snapshot>>,
}

impl TrackedQuery {
    pub fn summary(&self) -> TrackedQuerySummary {
        TrackedQuerySummary {
            query_id: self.query_id,
            query_text: self.query_text.clone(),
            is_active: self.is_active,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedQuerySummary {
    pub query_id: Uuid,
    pub query_text: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Work item for the batch refresher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveQuery {
    pub query_id: Uuid,
    pub user_id: String,
    pub query_text: String,
}

/// Newest-created first, ties broken by query id descending.
pub fn sort_newest_first(queries: &mut [TrackedQuerySummary]) {
    queries.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.query_id.cmp(&a.query_id))
    });
}
