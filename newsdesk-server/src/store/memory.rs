use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use newsdesk_core::guard::{self, Owned};
use newsdesk_core::models::{
    self, session, tracked_query, ActiveQuery, Message, MessagePreview, NewMessage, Session,
    SessionMatch, SessionSummary, Snapshot, TrackedQuery, TrackedQuerySummary,
};
use newsdesk_core::{NewsdeskError, RecordKind};

use super::{cap_error, cap_exceeded, ConversationStore, SnapshotBuilder, TrackedQueryStore};

/// A record behind its own lock. `None` marks a record deleted while another
/// task still held the `Arc`.
type Slot<T> = Arc<Mutex<Option<T>>>;

#[derive(Debug, Clone, Copy)]
struct DirectoryEntry {
    session_id: Uuid,
    created_at: DateTime<Utc>,
}

#[derive(Default)]
struct SessionTables {
    records: HashMap<Uuid, Slot<Session>>,
    directory: HashMap<String, Vec<DirectoryEntry>>,
}

#[derive(Debug)]
struct QueryRecord {
    query: TrackedQuery,
    history: Vec<Snapshot>,
}

impl Owned for QueryRecord {
    fn owner(&self) -> &str {
        &self.query.user_id
    }
}

#[derive(Default)]
struct QueryTables {
    records: HashMap<Uuid, Slot<QueryRecord>>,
    by_user: HashMap<String, Vec<Uuid>>,
}

/// Process-local store. Table maps are guarded by an `RwLock` held only long
/// enough to clone a slot; record mutations hold the slot's own mutex.
#[derive(Default)]
pub struct MemoryStore {
    sessions: RwLock<SessionTables>,
    queries: RwLock<QueryTables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn session_slot(&self, session_id: Uuid) -> Option<Slot<Session>> {
        self.sessions.read().await.records.get(&session_id).cloned()
    }

    async fn query_slot(&self, query_id: Uuid) -> Option<Slot<QueryRecord>> {
        self.queries.read().await.records.get(&query_id).cloned()
    }

    async fn user_sessions(&self, user_id: &str) -> Vec<Slot<Session>> {
        let tables = self.sessions.read().await;
        let Some(entries) = tables.directory.get(user_id) else {
            return Vec::new();
        };
        let slots = entries
            .iter()
            .filter_map(|e| tables.records.get(&e.session_id).cloned())
            .collect();
        slots
    }

    async fn user_queries(&self, user_id: &str) -> Vec<Slot<QueryRecord>> {
        let tables = self.queries.read().await;
        let Some(ids) = tables.by_user.get(user_id) else {
            return Vec::new();
        };
        let slots = ids
            .iter()
            .filter_map(|id| tables.records.get(id).cloned())
            .collect();
        slots
    }

    fn insert_session(tables: &mut SessionTables, user_id: &str) -> SessionSummary {
        let session = Session {
            session_id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            title: None,
            created_at: models::now(),
            messages: Vec::new(),
        };
        let summary = session.summary();
        tables.directory.entry(user_id.to_string()).or_default().push(DirectoryEntry {
            session_id: session.session_id,
            created_at: session.created_at,
        });
        tables
            .records
            .insert(session.session_id, Arc::new(Mutex::new(Some(session))));
        summary
    }
}

fn owned_mut<'a, T: Owned>(
    slot: &'a mut Option<T>,
    caller: &str,
    kind: RecordKind,
    id: Uuid,
) -> Result<&'a mut T, NewsdeskError> {
    guard::authorize(caller, slot.as_ref().map(|r| r.owner()), kind, id)?;
    slot.as_mut().ok_or_else(|| missing(kind, id))
}

fn missing(kind: RecordKind, id: Uuid) -> NewsdeskError {
    NewsdeskError::not_found(kind, id)
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn create_session(&self, user_id: &str) -> Result<SessionSummary, NewsdeskError> {
        guard::require_user(user_id)?;
        let mut tables = self.sessions.write().await;
        let summary = Self::insert_session(&mut tables, user_id);
        tracing::debug!(session_id = %summary.session_id, "Session created");
        Ok(summary)
    }

    async fn get_session(
        &self,
        session_id: Uuid,
        user_id: &str,
    ) -> Result<Session, NewsdeskError> {
        let slot = self
            .session_slot(session_id)
            .await
            .ok_or_else(|| missing(RecordKind::Session, session_id))?;
        let mut record = slot.lock().await;
        let session = owned_mut(&mut record, user_id, RecordKind::Session, session_id)?;
        Ok(session.clone())
    }

    async fn append_messages(
        &self,
        session_id: Uuid,
        user_id: &str,
        messages: Vec<NewMessage>,
        cap: Option<usize>,
    ) -> Result<Vec<Message>, NewsdeskError> {
        let slot = self
            .session_slot(session_id)
            .await
            .ok_or_else(|| missing(RecordKind::Session, session_id))?;
        let mut record = slot.lock().await;
        let session = owned_mut(&mut record, user_id, RecordKind::Session, session_id)?;

        if cap_exceeded(session.messages.len(), messages.len(), cap) {
            return Err(cap_error(cap));
        }

        let timestamp = models::now();
        let stamped: Vec<Message> = messages.into_iter().map(|m| m.stamp(timestamp)).collect();
        session.messages.extend(stamped.iter().cloned());
        Ok(stamped)
    }

    async fn clear(&self, session_id: Uuid, user_id: &str) -> Result<(), NewsdeskError> {
        let slot = self
            .session_slot(session_id)
            .await
            .ok_or_else(|| missing(RecordKind::Session, session_id))?;
        let mut record = slot.lock().await;
        let session = owned_mut(&mut record, user_id, RecordKind::Session, session_id)?;
        session.messages.clear();
        Ok(())
    }

    async fn delete(&self, session_id: Uuid, user_id: &str) -> Result<(), NewsdeskError> {
        // Table lock first, then the slot: the record and its directory entry
        // disappear together. No other path waits on the table while holding a slot.
        let mut tables = self.sessions.write().await;
        let slot = tables
            .records
            .get(&session_id)
            .cloned()
            .ok_or_else(|| missing(RecordKind::Session, session_id))?;
        let mut record = slot.lock().await;
        owned_mut(&mut record, user_id, RecordKind::Session, session_id)?;
        *record = None;

        tables.records.remove(&session_id);
        if let Some(entries) = tables.directory.get_mut(user_id) {
            entries.retain(|e| e.session_id != session_id);
            if entries.is_empty() {
                tables.directory.remove(user_id);
            }
        }
        Ok(())
    }

    async fn set_title_if_absent(
        &self,
        session_id: Uuid,
        user_id: &str,
        title: &str,
    ) -> Result<bool, NewsdeskError> {
        let slot = self
            .session_slot(session_id)
            .await
            .ok_or_else(|| missing(RecordKind::Session, session_id))?;
        let mut record = slot.lock().await;
        let session = owned_mut(&mut record, user_id, RecordKind::Session, session_id)?;
        if session.title.is_some() {
            return Ok(false);
        }
        session.title = Some(title.to_string());
        Ok(true)
    }

    async fn list_sessions(&self, user_id: &str) -> Result<Vec<SessionSummary>, NewsdeskError> {
        let slots = self.user_sessions(user_id).await;

        let mut summaries = Vec::with_capacity(slots.len());
        for slot in slots {
            if let Some(session) = slot.lock().await.as_ref() {
                summaries.push(session.summary());
            }
        }
        session::sort_newest_first(&mut summaries);
        Ok(summaries)
    }

    async fn resolve_default(&self, user_id: &str) -> Result<Uuid, NewsdeskError> {
        guard::require_user(user_id)?;
        let mut tables = self.sessions.write().await;
        let latest = tables
            .directory
            .get(user_id)
            .and_then(|entries| {
                entries
                    .iter()
                    .max_by(|a, b| {
                        a.created_at
                            .cmp(&b.created_at)
                            .then_with(|| a.session_id.cmp(&b.session_id))
                    })
                    .copied()
            });
        match latest {
            Some(entry) => Ok(entry.session_id),
            None => {
                let summary = Self::insert_session(&mut tables, user_id);
                tracing::debug!(session_id = %summary.session_id, "Default session created");
                Ok(summary.session_id)
            }
        }
    }

    async fn search(
        &self,
        user_id: &str,
        needle: &str,
    ) -> Result<Vec<SessionMatch>, NewsdeskError> {
        let needle = needle.to_lowercase();
        let slots = self.user_sessions(user_id).await;

        let mut found = Vec::new();
        for slot in slots {
            let record = slot.lock().await;
            let Some(s) = record.as_ref() else { continue };
            let matched_messages: Vec<MessagePreview> = s
                .messages
                .iter()
                .filter(|m| session::contains_ignore_case(&m.content, &needle))
                .map(|m| MessagePreview {
                    role: m.role,
                    timestamp: m.timestamp,
                    preview: session::preview(&m.content),
                })
                .collect();
            let title_hit = s
                .title
                .as_deref()
                .is_some_and(|t| session::contains_ignore_case(t, &needle));
            if title_hit || !matched_messages.is_empty() {
                found.push(SessionMatch {
                    session_id: s.session_id,
                    title: s.title.clone().unwrap_or_else(|| session::UNTITLED.to_string()),
                    created_at: s.created_at,
                    matched_messages,
                });
            }
        }
        found.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.session_id.cmp(&a.session_id))
        });
        Ok(found)
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[async_trait]
impl TrackedQueryStore for MemoryStore {
    async fn create(
        &self,
        user_id: &str,
        query_text: &str,
    ) -> Result<TrackedQuery, NewsdeskError> {
        guard::require_user(user_id)?;
        if query_text.trim().is_empty() {
            return Err(NewsdeskError::invalid("query_text is required"));
        }
        let now = models::now();
        let query = TrackedQuery {
            query_id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            query_text: query_text.to_string(),
            is_active: true,
            created_at: now,
            updated_at: now,
            history: None,
        };

        let mut tables = self.queries.write().await;
        tables
            .by_user
            .entry(user_id.to_string())
            .or_default()
            .push(query.query_id);
        tables.records.insert(
            query.query_id,
            Arc::new(Mutex::new(Some(QueryRecord {
                query: query.clone(),
                history: Vec::new(),
            }))),
        );
        Ok(TrackedQuery {
            history: Some(Vec::new()),
            ..query
        })
    }

    async fn get(
        &self,
        query_id: Uuid,
        user_id: &str,
        include_history: bool,
    ) -> Result<TrackedQuery, NewsdeskError> {
        let slot = self
            .query_slot(query_id)
            .await
            .ok_or_else(|| missing(RecordKind::TrackedQuery, query_id))?;
        let mut record = slot.lock().await;
        let record = owned_mut(&mut record, user_id, RecordKind::TrackedQuery, query_id)?;
        Ok(TrackedQuery {
            history: include_history.then(|| record.history.clone()),
            ..record.query.clone()
        })
    }

    async fn list(&self, user_id: &str) -> Result<Vec<TrackedQuerySummary>, NewsdeskError> {
        let slots = self.user_queries(user_id).await;

        let mut summaries = Vec::with_capacity(slots.len());
        for slot in slots {
            if let Some(record) = slot.lock().await.as_ref() {
                summaries.push(record.query.summary());
            }
        }
        tracked_query::sort_newest_first(&mut summaries);
        Ok(summaries)
    }

    async fn update_status(
        &self,
        query_id: Uuid,
        user_id: &str,
        is_active: bool,
    ) -> Result<TrackedQuerySummary, NewsdeskError> {
        let slot = self
            .query_slot(query_id)
            .await
            .ok_or_else(|| missing(RecordKind::TrackedQuery, query_id))?;
        let mut record = slot.lock().await;
        let record = owned_mut(&mut record, user_id, RecordKind::TrackedQuery, query_id)?;
        record.query.is_active = is_active;
        record.query.updated_at = models::now();
        Ok(record.query.summary())
    }

    async fn delete(&self, query_id: Uuid, user_id: &str) -> Result<(), NewsdeskError> {
        let mut tables = self.queries.write().await;
        let slot = tables
            .records
            .get(&query_id)
            .cloned()
            .ok_or_else(|| missing(RecordKind::TrackedQuery, query_id))?;
        let mut record = slot.lock().await;
        owned_mut(&mut record, user_id, RecordKind::TrackedQuery, query_id)?;
        *record = None;

        tables.records.remove(&query_id);
        if let Some(ids) = tables.by_user.get_mut(user_id) {
            ids.retain(|id| *id != query_id);
            if ids.is_empty() {
                tables.by_user.remove(user_id);
            }
        }
        Ok(())
    }

    async fn append_snapshot(
        &self,
        query_id: Uuid,
        user_id: &str,
        build: SnapshotBuilder<'_>,
    ) -> Result<Snapshot, NewsdeskError> {
        let slot = self
            .query_slot(query_id)
            .await
            .ok_or_else(|| missing(RecordKind::TrackedQuery, query_id))?;
        let mut record = slot.lock().await;
        let record = owned_mut(&mut record, user_id, RecordKind::TrackedQuery, query_id)?;

        let previous = record.history.last().map(|s| s.summary.as_str());
        let snapshot = build(previous);
        record.query.updated_at = snapshot.date;
        record.history.push(snapshot.clone());
        Ok(snapshot)
    }

    async fn list_active(&self, limit: u32) -> Result<Vec<ActiveQuery>, NewsdeskError> {
        let slots: Vec<Slot<QueryRecord>> =
            self.queries.read().await.records.values().cloned().collect();

        let mut active = Vec::new();
        for slot in slots {
            if let Some(record) = slot.lock().await.as_ref() {
                if record.query.is_active {
                    active.push((
                        record.query.updated_at,
                        ActiveQuery {
                            query_id: record.query.query_id,
                            user_id: record.query.user_id.clone(),
                            query_text: record.query.query_text.clone(),
                        },
                    ));
                }
            }
        }
        active.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.query_id.cmp(&b.1.query_id)));
        Ok(active
            .into_iter()
            .take(limit as usize)
            .map(|(_, q)| q)
            .collect())
    }
}
