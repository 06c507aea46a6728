//! Persistence for conversations and tracked queries.
//!
//! Two interchangeable backends implement the same traits:
//! - [`postgres::PgStore`]: row locks (`SELECT ... FOR UPDATE`) make every
//!   mutation an atomic read-authorize-write on one record.
//! - [`memory::MemoryStore`]: per-record `tokio::sync::Mutex` slots, used by
//!   tests and database-less development.
//!
//! Every call that names a record re-checks ownership through
//! `newsdesk_core::guard` before reading or writing it.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use newsdesk_core::models::{
    ActiveQuery, Message, NewMessage, Role, Session, SessionMatch, SessionSummary, Snapshot,
    TrackedQuery, TrackedQuerySummary,
};
use newsdesk_core::NewsdeskError;
use uuid::Uuid;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Builds the next snapshot from the latest prior summary. Invoked while the
/// tracked query is locked.
pub type SnapshotBuilder<'a> = &'a (dyn Fn(Option<&str>) -> Snapshot + Send + Sync);

/// Conversation log storage plus the per-user session directory.
///
/// Both responsibilities live in one store so a session and its directory
/// entry are created and removed in the same atomic write.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Creates an empty session and registers it in the user's directory.
    async fn create_session(&self, user_id: &str) -> Result<SessionSummary, NewsdeskError>;

    async fn get_session(&self, session_id: Uuid, user_id: &str)
        -> Result<Session, NewsdeskError>;

    async fn read_messages(
        &self,
        session_id: Uuid,
        user_id: &str,
    ) -> Result<Vec<Message>, NewsdeskError> {
        Ok(self.get_session(session_id, user_id).await?.messages)
    }

    /// Appends in order, stamping each message with the server time. With
    /// `cap` set, rejects the whole batch if the log would exceed it.
    async fn append_messages(
        &self,
        session_id: Uuid,
        user_id: &str,
        messages: Vec<NewMessage>,
        cap: Option<usize>,
    ) -> Result<Vec<Message>, NewsdeskError>;

    async fn append(
        &self,
        session_id: Uuid,
        user_id: &str,
        role: Role,
        content: &str,
    ) -> Result<Message, NewsdeskError> {
        let message = NewMessage {
            role,
            content: content.to_string(),
        };
        self.append_messages(session_id, user_id, vec![message], None)
            .await?
            .pop()
            .ok_or_else(|| NewsdeskError::Internal("append returned no message".to_string()))
    }

    /// Empties the log; identity, title and `created_at` survive.
    async fn clear(&self, session_id: Uuid, user_id: &str) -> Result<(), NewsdeskError>;

    /// Removes the session and its directory entry.
    async fn delete(&self, session_id: Uuid, user_id: &str) -> Result<(), NewsdeskError>;

    /// First writer wins. Returns whether the title was set.
    async fn set_title_if_absent(
        &self,
        session_id: Uuid,
        user_id: &str,
        title: &str,
    ) -> Result<bool, NewsdeskError>;

    /// Directory listing, newest first.
    async fn list_sessions(&self, user_id: &str) -> Result<Vec<SessionSummary>, NewsdeskError>;

    /// Most recently created session for the user, created if none exists.
    /// Atomic per user.
    async fn resolve_default(&self, user_id: &str) -> Result<Uuid, NewsdeskError>;

    /// Case-insensitive match on titles and message contents.
    async fn search(&self, user_id: &str, needle: &str)
        -> Result<Vec<SessionMatch>, NewsdeskError>;

    fn backend(&self) -> &'static str;
}

#[async_trait]
pub trait TrackedQueryStore: Send + Sync {
    async fn create(&self, user_id: &str, query_text: &str)
        -> Result<TrackedQuery, NewsdeskError>;

    async fn get(
        &self,
        query_id: Uuid,
        user_id: &str,
        include_history: bool,
    ) -> Result<TrackedQuery, NewsdeskError>;

    /// Newest-created first.
    async fn list(&self, user_id: &str) -> Result<Vec<TrackedQuerySummary>, NewsdeskError>;

    async fn update_status(
        &self,
        query_id: Uuid,
        user_id: &str,
        is_active: bool,
    ) -> Result<TrackedQuerySummary, NewsdeskError>;

    async fn delete(&self, query_id: Uuid, user_id: &str) -> Result<(), NewsdeskError>;

    /// Appends the snapshot produced by `build` and bumps `updated_at` to
    /// the snapshot date, all under the record's lock.
    async fn append_snapshot(
        &self,
        query_id: Uuid,
        user_id: &str,
        build: SnapshotBuilder<'_>,
    ) -> Result<Snapshot, NewsdeskError>;

    /// Active queries across all users, least recently updated first.
    async fn list_active(&self, limit: u32) -> Result<Vec<ActiveQuery>, NewsdeskError>;
}

pub(crate) fn cap_exceeded(current: usize, adding: usize, cap: Option<usize>) -> bool {
    matches!(cap, Some(max) if current + adding > max)
}

pub(crate) fn cap_error(cap: Option<usize>) -> NewsdeskError {
    NewsdeskError::invalid(format!(
        "session log is full (limit {} messages)",
        cap.unwrap_or_default()
    ))
}
