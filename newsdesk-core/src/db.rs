use crate::config::DatabaseConfig;
use sqlx::{postgres::PgPoolOptions, PgPool};

/// Idempotent schema. Sessions and tracked queries are keyed by id with a
/// secondary index on `user_id`; logs and histories cascade with their parent.
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS chat_sessions (
        session_id UUID PRIMARY KEY,
        user_id TEXT NOT NULL,
        title TEXT,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS chat_sessions_user_idx
        ON chat_sessions (user_id, created_at DESC, session_id DESC)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS chat_messages (
        id BIGSERIAL PRIMARY KEY,
        session_id UUID NOT NULL REFERENCES chat_sessions (session_id) ON DELETE CASCADE,
        role TEXT NOT NULL CHECK (role IN ('user', 'ai')),
        content TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS chat_messages_session_idx
        ON chat_messages (session_id, id)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tracked_queries (
        query_id UUID PRIMARY KEY,
        user_id TEXT NOT NULL,
        query_text TEXT NOT NULL,
        is_active BOOLEAN NOT NULL DEFAULT TRUE,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS tracked_queries_user_idx
        ON tracked_queries (user_id, created_at DESC, query_id DESC)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tracked_query_snapshots (
        id BIGSERIAL PRIMARY KEY,
        query_id UUID NOT NULL REFERENCES tracked_queries (query_id) ON DELETE CASCADE,
        taken_at TIMESTAMPTZ NOT NULL,
        summary TEXT NOT NULL,
        sources JSONB NOT NULL DEFAULT '{}'::jsonb,
        new_content TEXT,
        removed_content TEXT
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS tracked_query_snapshots_query_idx
        ON tracked_query_snapshots (query_id, id)
    "#,
];

pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await
}

pub async fn health_check(pool: &PgPool) -> Result<String, sqlx::Error> {
    let row: (String,) = sqlx::query_as("SELECT version()").fetch_one(pool).await?;
    Ok(row.0)
}

/// Serializes concurrent `ensure_schema` callers.
const SCHEMA_LOCK_KEY: i64 = 0x6e65_7773_6465_736b;

pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(SCHEMA_LOCK_KEY)
        .execute(&mut *tx)
        .await?;
    for statement in SCHEMA {
        sqlx::query(statement).execute(&mut *tx).await?;
    }
    tx.commit().await?;
    tracing::info!(statements = SCHEMA.len(), "Database schema ensured");
    Ok(())
}
