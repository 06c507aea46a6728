use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use newsdesk_core::guard;
use newsdesk_core::models::{
    self, session, ActiveQuery, Changes, Message, MessagePreview, NewMessage, Role, Session,
    SessionMatch, SessionSummary, Snapshot, Sources, TrackedQuery, TrackedQuerySummary,
};
use newsdesk_core::{NewsdeskError, RecordKind};

use super::{cap_error, cap_exceeded, ConversationStore, SnapshotBuilder, TrackedQueryStore};

#[derive(Clone, Copy)]
enum Lock {
    Share,
    Update,
}

/// PostgreSQL-backed store. Each mutation is one transaction that locks the
/// parent row, authorizes against the locked owner, then writes.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

async fn lock_owner(
    tx: &mut Transaction<'_, Postgres>,
    kind: RecordKind,
    id: Uuid,
    caller: &str,
    lock: Lock,
) -> Result<(), NewsdeskError> {
    let sql = match (kind, lock) {
        (RecordKind::Session, Lock::Share) => {
            "SELECT user_id FROM chat_sessions WHERE session_id = $1 FOR SHARE"
        }
        (RecordKind::Session, Lock::Update) => {
            "SELECT user_id FROM chat_sessions WHERE session_id = $1 FOR UPDATE"
        }
        (RecordKind::TrackedQuery, Lock::Share) => {
            "SELECT user_id FROM tracked_queries WHERE query_id = $1 FOR SHARE"
        }
        (RecordKind::TrackedQuery, Lock::Update) => {
            "SELECT user_id FROM tracked_queries WHERE query_id = $1 FOR UPDATE"
        }
    };
    let owner: Option<(String,)> = sqlx::query_as(sql)
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?;
    guard::authorize(caller, owner.as_ref().map(|o| o.0.as_str()), kind, id)
}

fn parse_role(role: &str) -> Result<Role, NewsdeskError> {
    Role::parse(role).ok_or_else(|| NewsdeskError::Internal(format!("unknown message role '{role}'")))
}

/// `%needle%` for ILIKE, with the pattern metacharacters escaped.
fn like_pattern(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

#[derive(sqlx::FromRow)]
struct TrackedRow {
    query_id: Uuid,
    user_id: String,
    query_text: String,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TrackedRow {
    fn into_query(self, history: Option<Vec<Snapshot>>) -> TrackedQuery {
        TrackedQuery {
            query_id: self.query_id,
            user_id: self.user_id,
            query_text: self.query_text,
            is_active: self.is_active,
            created_at: self.created_at,
            updated_at: self.updated_at,
            history,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SnapshotRow {
    taken_at: DateTime<Utc>,
    summary: String,
    sources: Json<Sources>,
    new_content: Option<String>,
    removed_content: Option<String>,
}

impl From<SnapshotRow> for Snapshot {
    fn from(row: SnapshotRow) -> Self {
        Snapshot {
            date: row.taken_at,
            summary: row.summary,
            sources: row.sources.0,
            changes: Changes {
                new: row.new_content,
                removed: row.removed_content,
            },
        }
    }
}

const TRACKED_COLUMNS: &str =
    "query_id, user_id, query_text, is_active, created_at, updated_at";

#[async_trait]
impl ConversationStore for PgStore {
    async fn create_session(&self, user_id: &str) -> Result<SessionSummary, NewsdeskError> {
        guard::require_user(user_id)?;
        let session_id = Uuid::new_v4();
        let created_at = models::now();
        sqlx::query(
            "INSERT INTO chat_sessions (session_id, user_id, created_at) VALUES ($1, $2, $3)",
        )
        .bind(session_id)
        .bind(user_id)
        .bind(created_at)
        .execute(&self.pool)
        .await?;

        tracing::debug!(session_id = %session_id, "Session created");
        Ok(SessionSummary {
            session_id,
            title: None,
            created_at,
            message_count: 0,
        })
    }

    async fn get_session(
        &self,
        session_id: Uuid,
        user_id: &str,
    ) -> Result<Session, NewsdeskError> {
        let mut tx = self.pool.begin().await?;
        lock_owner(&mut tx, RecordKind::Session, session_id, user_id, Lock::Share).await?;

        let (title, created_at): (Option<String>, DateTime<Utc>) = sqlx::query_as(
            "SELECT title, created_at FROM chat_sessions WHERE session_id = $1",
        )
        .bind(session_id)
        .fetch_one(&mut *tx)
        .await?;

        let rows = sqlx::query_as::<_, (String, String, DateTime<Utc>)>(
            "SELECT role, content, created_at FROM chat_messages WHERE session_id = $1 ORDER BY id",
        )
        .bind(session_id)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        let messages = rows
            .into_iter()
            .map(|(role, content, timestamp)| {
                Ok(Message {
                    role: parse_role(&role)?,
                    content,
                    timestamp,
                })
            })
            .collect::<Result<Vec<_>, NewsdeskError>>()?;

        Ok(Session {
            session_id,
            user_id: user_id.to_string(),
            title,
            created_at,
            messages,
        })
    }

    async fn append_messages(
        &self,
        session_id: Uuid,
        user_id: &str,
        messages: Vec<NewMessage>,
        cap: Option<usize>,
    ) -> Result<Vec<Message>, NewsdeskError> {
        let mut tx = self.pool.begin().await?;
        lock_owner(&mut tx, RecordKind::Session, session_id, user_id, Lock::Update).await?;

        if cap.is_some() {
            let (count,): (i64,) =
                sqlx::query_as("SELECT COUNT(*) FROM chat_messages WHERE session_id = $1")
                    .bind(session_id)
                    .fetch_one(&mut *tx)
                    .await?;
            if cap_exceeded(count.max(0) as usize, messages.len(), cap) {
                return Err(cap_error(cap));
            }
        }

        let timestamp = models::now();
        let mut stamped = Vec::with_capacity(messages.len());
        for message in messages {
            sqlx::query(
                "INSERT INTO chat_messages (session_id, role, content, created_at) VALUES ($1, $2, $3, $4)",
            )
            .bind(session_id)
            .bind(message.role.as_str())
            .bind(&message.content)
            .bind(timestamp)
            .execute(&mut *tx)
            .await?;
            stamped.push(message.stamp(timestamp));
        }
        tx.commit().await?;
        Ok(stamped)
    }

    async fn clear(&self, session_id: Uuid, user_id: &str) -> Result<(), NewsdeskError> {
        let mut tx = self.pool.begin().await?;
        lock_owner(&mut tx, RecordKind::Session, session_id, user_id, Lock::Update).await?;
        let result = sqlx::query("DELETE FROM chat_messages WHERE session_id = $1")
            .bind(session_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        tracing::debug!(session_id = %session_id, removed = result.rows_affected(), "Session cleared");
        Ok(())
    }

    async fn delete(&self, session_id: Uuid, user_id: &str) -> Result<(), NewsdeskError> {
        let mut tx = self.pool.begin().await?;
        lock_owner(&mut tx, RecordKind::Session, session_id, user_id, Lock::Update).await?;
        sqlx::query("DELETE FROM chat_sessions WHERE session_id = $1")
            .bind(session_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn set_title_if_absent(
        &self,
        session_id: Uuid,
        user_id: &str,
        title: &str,
    ) -> Result<bool, NewsdeskError> {
        let mut tx = self.pool.begin().await?;
        lock_owner(&mut tx, RecordKind::Session, session_id, user_id, Lock::Update).await?;
        let result = sqlx::query(
            "UPDATE chat_sessions SET title = $2 WHERE session_id = $1 AND title IS NULL",
        )
        .bind(session_id)
        .bind(title)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_sessions(&self, user_id: &str) -> Result<Vec<SessionSummary>, NewsdeskError> {
        let rows = sqlx::query_as::<_, (Uuid, Option<String>, DateTime<Utc>, i64)>(
            r#"
            SELECT s.session_id, s.title, s.created_at,
                   (SELECT COUNT(*) FROM chat_messages m WHERE m.session_id = s.session_id)
            FROM chat_sessions s
            WHERE s.user_id = $1
            ORDER BY s.created_at DESC, s.session_id DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(session_id, title, created_at, count)| SessionSummary {
                session_id,
                title,
                created_at,
                message_count: count.max(0) as usize,
            })
            .collect())
    }

    async fn resolve_default(&self, user_id: &str) -> Result<Uuid, NewsdeskError> {
        guard::require_user(user_id)?;
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        let latest: Option<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT session_id FROM chat_sessions
            WHERE user_id = $1
            ORDER BY created_at DESC, session_id DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;

        let session_id = match latest {
            Some((id,)) => id,
            None => {
                let id = Uuid::new_v4();
                sqlx::query(
                    "INSERT INTO chat_sessions (session_id, user_id, created_at) VALUES ($1, $2, $3)",
                )
                .bind(id)
                .bind(user_id)
                .bind(models::now())
                .execute(&mut *tx)
                .await?;
                tracing::debug!(session_id = %id, "Default session created");
                id
            }
        };
        tx.commit().await?;
        Ok(session_id)
    }

    async fn search(
        &self,
        user_id: &str,
        needle: &str,
    ) -> Result<Vec<SessionMatch>, NewsdeskError> {
        let pattern = like_pattern(needle);
        let rows = sqlx::query_as::<
            _,
            (
                Uuid,
                Option<String>,
                DateTime<Utc>,
                Option<String>,
                Option<String>,
                Option<DateTime<Utc>>,
            ),
        >(
            r#"
            SELECT s.session_id, s.title, s.created_at, m.role, m.content, m.created_at
            FROM chat_sessions s
            LEFT JOIN chat_messages m
                   ON m.session_id = s.session_id AND m.content ILIKE $2
            WHERE s.user_id = $1
              AND (s.title ILIKE $2 OR m.id IS NOT NULL)
            ORDER BY s.created_at DESC, s.session_id DESC, m.id
            "#,
        )
        .bind(user_id)
        .bind(&pattern)
        .fetch_all(&self.pool)
        .await?;

        let mut found: Vec<SessionMatch> = Vec::new();
        for (session_id, title, created_at, role, content, timestamp) in rows {
            if found.last().map(|m| m.session_id) != Some(session_id) {
                found.push(SessionMatch {
                    session_id,
                    title: title.unwrap_or_else(|| session::UNTITLED.to_string()),
                    created_at,
                    matched_messages: Vec::new(),
                });
            }
            if let (Some(role), Some(content), Some(timestamp)) = (role, content, timestamp) {
                if let Some(current) = found.last_mut() {
                    current.matched_messages.push(MessagePreview {
                        role: parse_role(&role)?,
                        timestamp,
                        preview: session::preview(&content),
                    });
                }
            }
        }
        Ok(found)
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}

#[async_trait]
impl TrackedQueryStore for PgStore {
    async fn create(
        &self,
        user_id: &str,
        query_text: &str,
    ) -> Result<TrackedQuery, NewsdeskError> {
        guard::require_user(user_id)?;
        if query_text.trim().is_empty() {
            return Err(NewsdeskError::invalid("query_text is required"));
        }
        let query_id = Uuid::new_v4();
        let now = models::now();
        sqlx::query(
            r#"
            INSERT INTO tracked_queries (query_id, user_id, query_text, is_active, created_at, updated_at)
            VALUES ($1, $2, $3, TRUE, $4, $4)
            "#,
        )
        .bind(query_id)
        .bind(user_id)
        .bind(query_text)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(TrackedQuery {
            query_id,
            user_id: user_id.to_string(),
            query_text: query_text.to_string(),
            is_active: true,
            created_at: now,
            updated_at: now,
            history: Some(Vec::new()),
        })
    }

    async fn get(
        &self,
        query_id: Uuid,
        user_id: &str,
        include_history: bool,
    ) -> Result<TrackedQuery, NewsdeskError> {
        let mut tx = self.pool.begin().await?;
        lock_owner(&mut tx, RecordKind::TrackedQuery, query_id, user_id, Lock::Share).await?;

        let row: TrackedRow = sqlx::query_as(&format!(
            "SELECT {TRACKED_COLUMNS} FROM tracked_queries WHERE query_id = $1"
        ))
        .bind(query_id)
        .fetch_one(&mut *tx)
        .await?;

        let history = if include_history {
            let snapshots = sqlx::query_as::<_, SnapshotRow>(
                r#"
                SELECT taken_at, summary, sources, new_content, removed_content
                FROM tracked_query_snapshots
                WHERE query_id = $1
                ORDER BY id
                "#,
            )
            .bind(query_id)
            .fetch_all(&mut *tx)
            .await?;
            Some(snapshots.into_iter().map(Snapshot::from).collect())
        } else {
            None
        };
        tx.commit().await?;

        Ok(row.into_query(history))
    }

    async fn list(&self, user_id: &str) -> Result<Vec<TrackedQuerySummary>, NewsdeskError> {
        let rows = sqlx::query_as::<_, TrackedRow>(&format!(
            "SELECT {TRACKED_COLUMNS} FROM tracked_queries WHERE user_id = $1 ORDER BY created_at DESC, query_id DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| row.into_query(None).summary())
            .collect())
    }

    async fn update_status(
        &self,
        query_id: Uuid,
        user_id: &str,
        is_active: bool,
    ) -> Result<TrackedQuerySummary, NewsdeskError> {
        let mut tx = self.pool.begin().await?;
        lock_owner(&mut tx, RecordKind::TrackedQuery, query_id, user_id, Lock::Update).await?;
        let row: TrackedRow = sqlx::query_as(&format!(
            "UPDATE tracked_queries SET is_active = $2, updated_at = $3 WHERE query_id = $1 RETURNING {TRACKED_COLUMNS}"
        ))
        .bind(query_id)
        .bind(is_active)
        .bind(models::now())
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(row.into_query(None).summary())
    }

    async fn delete(&self, query_id: Uuid, user_id: &str) -> Result<(), NewsdeskError> {
        let mut tx = self.pool.begin().await?;
        lock_owner(&mut tx, RecordKind::TrackedQuery, query_id, user_id, Lock::Update).await?;
        sqlx::query("DELETE FROM tracked_queries WHERE query_id = $1")
            .bind(query_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn append_snapshot(
        &self,
        query_id: Uuid,
        user_id: &str,
        build: SnapshotBuilder<'_>,
    ) -> Result<Snapshot, NewsdeskError> {
        let mut tx = self.pool.begin().await?;
        lock_owner(&mut tx, RecordKind::TrackedQuery, query_id, user_id, Lock::Update).await?;

        let previous: Option<(String,)> = sqlx::query_as(
            "SELECT summary FROM tracked_query_snapshots WHERE query_id = $1 ORDER BY id DESC LIMIT 1",
        )
        .bind(query_id)
        .fetch_optional(&mut *tx)
        .await?;

        let snapshot = build(previous.as_ref().map(|p| p.0.as_str()));

        sqlx::query(
            r#"
            INSERT INTO tracked_query_snapshots
                (query_id, taken_at, summary, sources, new_content, removed_content)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(query_id)
        .bind(snapshot.date)
        .bind(&snapshot.summary)
        .bind(Json(&snapshot.sources))
        .bind(snapshot.changes.new.as_deref())
        .bind(snapshot.changes.removed.as_deref())
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE tracked_queries SET updated_at = $2 WHERE query_id = $1")
            .bind(query_id)
            .bind(snapshot.date)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(snapshot)
    }

    async fn list_active(&self, limit: u32) -> Result<Vec<ActiveQuery>, NewsdeskError> {
        let rows = sqlx::query_as::<_, (Uuid, String, String)>(
            r#"
            SELECT query_id, user_id, query_text
            FROM tracked_queries
            WHERE is_active
            ORDER BY updated_at ASC, query_id ASC
            LIMIT $1
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(query_id, user_id, query_text)| ActiveQuery {
                query_id,
                user_id,
                query_text,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("rust"), "%rust%");
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
        assert_eq!(like_pattern(r"a\b"), r"%a\\b%");
    }
}
