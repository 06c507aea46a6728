//! Engine facade: the logical operations behind every transport.
//!
//! The caller's `user_id` is taken as already authenticated. Input is
//! validated before any store is touched; ownership is checked inside the
//! stores under the record's lock.

use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use newsdesk_core::config::LimitsConfig;
use newsdesk_core::guard;
use newsdesk_core::models::{
    self, Message, NewMessage, Session, SessionMatch, SessionSummary, Snapshot, Sources,
    TrackedQuery, TrackedQuerySummary,
};
use newsdesk_core::{Article, NewsdeskError, SnapshotDiffer};

use crate::store::{ConversationStore, MemoryStore, TrackedQueryStore};
use crate::subsystems::agent::Assistant;
use crate::subsystems::refresh::{self, RefreshReport};

#[derive(Debug, Clone, Serialize)]
pub struct AskOutcome {
    pub session_id: Uuid,
    pub response: String,
    pub sources: Vec<Article>,
    /// The user/ai pair appended by this ask.
    pub messages: Vec<Message>,
}

pub struct Engine {
    sessions: Arc<dyn ConversationStore>,
    tracked: Arc<dyn TrackedQueryStore>,
    assistant: Option<Arc<dyn Assistant>>,
    differ: SnapshotDiffer,
    limits: LimitsConfig,
}

impl Engine {
    pub fn new(
        sessions: Arc<dyn ConversationStore>,
        tracked: Arc<dyn TrackedQueryStore>,
        limits: LimitsConfig,
    ) -> Self {
        Self {
            sessions,
            tracked,
            assistant: None,
            differ: SnapshotDiffer::default(),
            limits,
        }
    }

    /// Both stores backed by one [`MemoryStore`].
    pub fn in_memory(limits: LimitsConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::new(store.clone(), store, limits)
    }

    pub fn with_assistant(mut self, assistant: Arc<dyn Assistant>) -> Self {
        self.assistant = Some(assistant);
        self
    }

    pub fn backend(&self) -> &'static str {
        self.sessions.backend()
    }

    pub fn limits(&self) -> &LimitsConfig {
        &self.limits
    }

    pub(crate) fn tracked_store(&self) -> &dyn TrackedQueryStore {
        self.tracked.as_ref()
    }

    fn assistant(&self) -> Result<&Arc<dyn Assistant>, NewsdeskError> {
        self.assistant
            .as_ref()
            .ok_or_else(|| NewsdeskError::Upstream("news agent is not configured".to_string()))
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    pub async fn start_session(&self, user_id: &str) -> Result<SessionSummary, NewsdeskError> {
        guard::require_user(user_id)?;
        let summary = self.sessions.create_session(user_id).await?;
        tracing::info!(session_id = %summary.session_id, "Session started");
        Ok(summary)
    }

    pub async fn ask_in_session(
        &self,
        session_id: Uuid,
        user_id: &str,
        query: &str,
    ) -> Result<AskOutcome, NewsdeskError> {
        guard::require_user(user_id)?;
        let query = require_text(query, "query")?;
        self.ask(session_id, user_id, query).await
    }

    pub async fn ask_default(&self, user_id: &str, query: &str) -> Result<AskOutcome, NewsdeskError> {
        guard::require_user(user_id)?;
        let query = require_text(query, "query")?;
        let session_id = self.sessions.resolve_default(user_id).await?;
        self.ask(session_id, user_id, query).await
    }

    async fn ask(
        &self,
        session_id: Uuid,
        user_id: &str,
        query: &str,
    ) -> Result<AskOutcome, NewsdeskError> {
        let session = self.sessions.get_session(session_id, user_id).await?;
        let cap = self.limits.max_messages_per_session;
        if let Some(max) = cap {
            if session.messages.len() + 2 > max {
                return Err(NewsdeskError::invalid(format!(
                    "session log is full (limit {max} messages)"
                )));
            }
        }

        let assistant = self.assistant()?;
        let answer = assistant
            .answer(query, recent(&session, self.limits.context_messages))
            .await?;

        let messages = self
            .sessions
            .append_messages(
                session_id,
                user_id,
                vec![NewMessage::user(query), NewMessage::ai(answer.response.clone())],
                cap,
            )
            .await?;

        if session.title.is_none() {
            let title = assistant.title_for(query).await;
            if let Err(e) = self
                .sessions
                .set_title_if_absent(session_id, user_id, &title)
                .await
            {
                tracing::warn!(session_id = %session_id, error = %e, "Failed to set session title");
            }
        }

        tracing::info!(session_id = %session_id, sources = answer.sources.len(), "Query answered");
        Ok(AskOutcome {
            session_id,
            response: answer.response,
            sources: answer.sources,
            messages,
        })
    }

    pub async fn list_sessions(&self, user_id: &str) -> Result<Vec<SessionSummary>, NewsdeskError> {
        guard::require_user(user_id)?;
        self.sessions.list_sessions(user_id).await
    }

    pub async fn get_session(&self, session_id: Uuid, user_id: &str) -> Result<Session, NewsdeskError> {
        guard::require_user(user_id)?;
        self.sessions.get_session(session_id, user_id).await
    }

    pub async fn get_session_history(
        &self,
        session_id: Uuid,
        user_id: &str,
    ) -> Result<Vec<Message>, NewsdeskError> {
        guard::require_user(user_id)?;
        self.sessions.read_messages(session_id, user_id).await
    }

    pub async fn clear_session(&self, session_id: Uuid, user_id: &str) -> Result<(), NewsdeskError> {
        guard::require_user(user_id)?;
        self.sessions.clear(session_id, user_id).await?;
        tracing::info!(session_id = %session_id, "Session cleared");
        Ok(())
    }

    pub async fn delete_session(&self, session_id: Uuid, user_id: &str) -> Result<(), NewsdeskError> {
        guard::require_user(user_id)?;
        self.sessions.delete(session_id, user_id).await?;
        tracing::info!(session_id = %session_id, "Session deleted");
        Ok(())
    }

    pub async fn search_sessions(
        &self,
        user_id: &str,
        needle: &str,
    ) -> Result<Vec<SessionMatch>, NewsdeskError> {
        guard::require_user(user_id)?;
        let needle = require_text(needle, "query")?;
        self.sessions.search(user_id, needle).await
    }

    // ------------------------------------------------------------------
    // Tracked queries
    // ------------------------------------------------------------------

    pub async fn create_tracked_query(
        &self,
        user_id: &str,
        query_text: &str,
    ) -> Result<TrackedQuery, NewsdeskError> {
        guard::require_user(user_id)?;
        let query_text = require_text(query_text, "query_text")?;
        let query = self.tracked.create(user_id, query_text).await?;
        tracing::info!(query_id = %query.query_id, "Tracked query created");
        Ok(query)
    }

    pub async fn list_tracked_queries(
        &self,
        user_id: &str,
    ) -> Result<Vec<TrackedQuerySummary>, NewsdeskError> {
        guard::require_user(user_id)?;
        self.tracked.list(user_id).await
    }

    pub async fn get_tracked_query(
        &self,
        query_id: Uuid,
        user_id: &str,
        include_history: bool,
    ) -> Result<TrackedQuery, NewsdeskError> {
        guard::require_user(user_id)?;
        self.tracked.get(query_id, user_id, include_history).await
    }

    pub async fn update_tracked_query_status(
        &self,
        query_id: Uuid,
        user_id: &str,
        is_active: bool,
    ) -> Result<TrackedQuerySummary, NewsdeskError> {
        guard::require_user(user_id)?;
        let summary = self.tracked.update_status(query_id, user_id, is_active).await?;
        tracing::info!(query_id = %query_id, is_active, "Tracked query status updated");
        Ok(summary)
    }

    pub async fn delete_tracked_query(&self, query_id: Uuid, user_id: &str) -> Result<(), NewsdeskError> {
        guard::require_user(user_id)?;
        self.tracked.delete(query_id, user_id).await?;
        tracing::info!(query_id = %query_id, "Tracked query deleted");
        Ok(())
    }

    /// Appends a snapshot built from an already generated summary. The diff
    /// runs against the latest prior summary while the query is locked.
    pub async fn refresh_tracked_query(
        &self,
        query_id: Uuid,
        user_id: &str,
        summary: &str,
        sources: Sources,
    ) -> Result<Snapshot, NewsdeskError> {
        guard::require_user(user_id)?;
        // Validated trimmed, stored as given.
        require_text(summary, "summary")?;

        let differ = self.differ;
        let build = |previous: Option<&str>| Snapshot {
            date: models::now(),
            summary: summary.to_string(),
            sources: sources.clone(),
            changes: differ.diff(previous, summary),
        };
        let snapshot = self.tracked.append_snapshot(query_id, user_id, &build).await?;

        tracing::info!(
            query_id = %query_id,
            unchanged = snapshot.changes.is_unchanged(),
            "Tracked query refreshed"
        );
        Ok(snapshot)
    }

    /// Generates the summary with the news agent, then refreshes. Nothing is
    /// appended when the agent fails.
    pub async fn refresh_from_upstream(
        &self,
        query_id: Uuid,
        user_id: &str,
    ) -> Result<Snapshot, NewsdeskError> {
        guard::require_user(user_id)?;
        let query = self.tracked.get(query_id, user_id, false).await?;
        let digest = self.assistant()?.digest(&query.query_text).await?;
        self.refresh_tracked_query(query_id, user_id, &digest.summary, digest.sources)
            .await
    }

    pub async fn refresh_active(&self, limit: Option<u32>) -> Result<RefreshReport, NewsdeskError> {
        let limit = limit.unwrap_or(self.limits.refresh_batch_size);
        refresh::refresh_active(self, limit, self.limits.refresh_concurrency).await
    }
}

fn require_text<'a>(value: &'a str, field: &str) -> Result<&'a str, NewsdeskError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(NewsdeskError::invalid(format!("{field} is required")));
    }
    Ok(trimmed)
}

/// The last `n` messages, oldest first.
fn recent(session: &Session, n: usize) -> &[Message] {
    let start = session.messages.len().saturating_sub(n);
    &session.messages[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_text_trims() {
        assert_eq!(require_text("  rust  ", "query").unwrap(), "rust");
        assert!(require_text(" \n ", "query").is_err());
    }

    #[test]
    fn test_recent_keeps_tail() {
        let mut session = Session {
            session_id: Uuid::new_v4(),
            user_id: "u".into(),
            title: None,
            created_at: models::now(),
            messages: Vec::new(),
        };
        for i in 0..5 {
            session.messages.push(NewMessage::user(format!("m{i}")).stamp(models::now()));
        }
        let tail = recent(&session, 2);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].content, "m3");
        assert_eq!(recent(&session, 50).len(), 5);
    }
}
