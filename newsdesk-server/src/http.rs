//! Newsdesk HTTP REST API
//!
//! Axum-based HTTP surface over the engine. Each endpoint has a thin axum
//! handler that builds an [`EngineRequest`] and hands it to [`dispatch`]; the
//! status code comes from the error kind in the response envelope.
//!
//! Endpoints:
//! - GET    /health                   storage backend and DB status
//! - GET    /version                  server version info
//! - POST   /sessions                 start a session
//! - GET    /sessions?user_id=        list sessions, newest first
//! - GET    /sessions/search          search titles and messages
//! - POST   /sessions/:id/ask         ask within a session
//! - GET    /sessions/:id/history     ordered messages
//! - POST   /sessions/:id/clear       empty the log
//! - DELETE /sessions/:id             delete the session
//! - POST   /ask                      ask in the user's default session
//! - POST   /tracked                  create a tracked query
//! - GET    /tracked?user_id=         list tracked queries
//! - POST   /tracked/refresh-active   refresh a batch of active queries
//! - GET    /tracked/:id              summary or full record
//! - PATCH  /tracked/:id/status       activate / deactivate
//! - DELETE /tracked/:id              delete
//! - POST   /tracked/:id/refresh      append a snapshot

use std::sync::Arc;

use anyhow::Result;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, patch, post};
use axum::{Json, Router};
use newsdesk_core::config::HttpConfig;
use newsdesk_core::models::Sources;
use newsdesk_core::protocol::{EngineRequest, EngineResponse, PROTOCOL};
use newsdesk_core::ErrorKind;
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::PgPool;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::engine::Engine;

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub engine: Arc<Engine>,
    /// Present for the PostgreSQL backend; used by `/health`.
    pub pool: Option<PgPool>,
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/sessions", post(start_session_handler).get(list_sessions_handler))
        .route("/sessions/search", get(search_sessions_handler))
        .route("/sessions/:id", delete(delete_session_handler))
        .route("/sessions/:id/ask", post(ask_in_session_handler))
        .route("/sessions/:id/history", get(history_handler))
        .route("/sessions/:id/clear", post(clear_session_handler))
        .route("/ask", post(ask_default_handler))
        .route("/tracked", post(create_tracked_handler).get(list_tracked_handler))
        .route("/tracked/refresh-active", post(refresh_active_handler))
        .route(
            "/tracked/:id",
            get(get_tracked_handler).delete(delete_tracked_handler),
        )
        .route("/tracked/:id/status", patch(tracked_status_handler))
        .route("/tracked/:id/refresh", post(refresh_tracked_handler))
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    engine: Arc<Engine>,
    pool: Option<PgPool>,
    config: &HttpConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let state = Arc::new(HttpState { engine, pool });

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Newsdesk HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request DTOs
// ============================================================================

// `user_id` defaults to empty so the engine reports it as InvalidInput.

#[derive(Debug, Deserialize, Default)]
pub struct UserParams {
    #[serde(default)]
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
pub struct AskBody {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub query: String,
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub query: String,
}

#[derive(Debug, Deserialize)]
pub struct TrackBody {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub query_text: String,
}

#[derive(Debug, Deserialize)]
pub struct GetTrackedParams {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub include_history: bool,
}

#[derive(Debug, Deserialize)]
pub struct StatusBody {
    #[serde(default)]
    pub user_id: String,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct RefreshBody {
    #[serde(default)]
    pub user_id: String,
    pub summary: Option<String>,
    pub sources: Option<Sources>,
}

#[derive(Debug, Deserialize, Default)]
pub struct RefreshActiveBody {
    pub limit: Option<u32>,
}

// ============================================================================
// Inner (directly testable) functions
// ============================================================================

/// Runs one request through the router and maps the envelope to HTTP.
pub async fn dispatch(engine: &Engine, request: EngineRequest) -> (StatusCode, Value) {
    let response = crate::router::handle_request(request, engine).await;
    envelope_to_http(response)
}

pub fn envelope_to_http(response: EngineResponse) -> (StatusCode, Value) {
    let status = StatusCode::from_u16(response.status_code())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = serde_json::to_value(&response).unwrap_or_else(|e| {
        json!({ "success": false, "kind": "internal", "error": e.to_string() })
    });
    (status, body)
}

/// Malformed ids are InvalidInput, never NotFound.
pub fn parse_id(raw: &str) -> std::result::Result<Uuid, (StatusCode, Value)> {
    Uuid::parse_str(raw).map_err(|_| {
        envelope_to_http(EngineResponse::err(
            ErrorKind::InvalidInput,
            format!("'{raw}' is not a valid id"),
        ))
    })
}

/// Inner health check. Reports the backend and, for PostgreSQL, the server version.
pub async fn health_inner(state: &HttpState) -> (StatusCode, Value) {
    let backend = state.engine.backend();
    let Some(pool) = state.pool.as_ref() else {
        return (
            StatusCode::OK,
            json!({ "success": true, "status": "healthy", "storage": backend }),
        );
    };

    match newsdesk_core::db::health_check(pool).await {
        Ok(version) => (
            StatusCode::OK,
            json!({
                "success": true,
                "status": "healthy",
                "storage": backend,
                "postgresql": version,
            }),
        ),
        Err(e) => {
            tracing::error!(error = %e, "Database health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                json!({
                    "success": false,
                    "status": "unhealthy",
                    "storage": backend,
                    "error": "database unavailable",
                }),
            )
        }
    }
}

/// Inner version. Returns version info (pure, no IO).
pub fn version_inner() -> Value {
    json!({
        "success": true,
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": PROTOCOL,
    })
}

// ============================================================================
// Axum handler wrappers, delegating to dispatch
// ============================================================================

macro_rules! with_id {
    ($raw:expr) => {
        match parse_id(&$raw) {
            Ok(id) => id,
            Err((status, body)) => return (status, Json(body)),
        }
    };
}

/// Extractor rejections (bad JSON, wrong content type, bad query string)
/// become InvalidInput envelopes.
macro_rules! with_body {
    ($extracted:expr) => {
        match $extracted {
            Ok(value) => value,
            Err(rejection) => return invalid_request(rejection.body_text()),
        }
    };
}

type Reply = (StatusCode, Json<Value>);

fn invalid_request(message: String) -> Reply {
    let (status, body) = envelope_to_http(EngineResponse::err(ErrorKind::InvalidInput, message));
    (status, Json(body))
}

async fn run(state: &HttpState, request: EngineRequest) -> Reply {
    let (status, body) = dispatch(&state.engine, request).await;
    (status, Json(body))
}

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn start_session_handler(
    State(state): State<Arc<HttpState>>,
    body: Result<Json<UserParams>, JsonRejection>,
) -> Reply {
    let Json(body) = with_body!(body);
    run(&state, EngineRequest::StartSession { user_id: body.user_id }).await
}

pub async fn list_sessions_handler(
    State(state): State<Arc<HttpState>>,
    params: Result<Query<UserParams>, QueryRejection>,
) -> Reply {
    let Query(params) = with_body!(params);
    run(&state, EngineRequest::ListSessions { user_id: params.user_id }).await
}

pub async fn search_sessions_handler(
    State(state): State<Arc<HttpState>>,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> Reply {
    let Query(params) = with_body!(params);
    run(
        &state,
        EngineRequest::SearchSessions {
            user_id: params.user_id,
            query: params.query,
        },
    )
    .await
}

pub async fn ask_in_session_handler(
    State(state): State<Arc<HttpState>>,
    Path(raw): Path<String>,
    body: Result<Json<AskBody>, JsonRejection>,
) -> Reply {
    let session_id = with_id!(raw);
    let Json(body) = with_body!(body);
    run(
        &state,
        EngineRequest::AskInSession {
            session_id,
            user_id: body.user_id,
            query: body.query,
        },
    )
    .await
}

pub async fn ask_default_handler(
    State(state): State<Arc<HttpState>>,
    body: Result<Json<AskBody>, JsonRejection>,
) -> Reply {
    let Json(body) = with_body!(body);
    run(
        &state,
        EngineRequest::AskDefault {
            user_id: body.user_id,
            query: body.query,
        },
    )
    .await
}

pub async fn history_handler(
    State(state): State<Arc<HttpState>>,
    Path(raw): Path<String>,
    params: Result<Query<UserParams>, QueryRejection>,
) -> Reply {
    let session_id = with_id!(raw);
    let Query(params) = with_body!(params);
    run(
        &state,
        EngineRequest::GetSessionHistory {
            session_id,
            user_id: params.user_id,
        },
    )
    .await
}

pub async fn clear_session_handler(
    State(state): State<Arc<HttpState>>,
    Path(raw): Path<String>,
    body: Result<Json<UserParams>, JsonRejection>,
) -> Reply {
    let session_id = with_id!(raw);
    let Json(body) = with_body!(body);
    run(
        &state,
        EngineRequest::ClearSession {
            session_id,
            user_id: body.user_id,
        },
    )
    .await
}

pub async fn delete_session_handler(
    State(state): State<Arc<HttpState>>,
    Path(raw): Path<String>,
    params: Result<Query<UserParams>, QueryRejection>,
) -> Reply {
    let session_id = with_id!(raw);
    let Query(params) = with_body!(params);
    run(
        &state,
        EngineRequest::DeleteSession {
            session_id,
            user_id: params.user_id,
        },
    )
    .await
}

pub async fn create_tracked_handler(
    State(state): State<Arc<HttpState>>,
    body: Result<Json<TrackBody>, JsonRejection>,
) -> Reply {
    let Json(body) = with_body!(body);
    run(
        &state,
        EngineRequest::CreateTrackedQuery {
            user_id: body.user_id,
            query_text: body.query_text,
        },
    )
    .await
}

pub async fn list_tracked_handler(
    State(state): State<Arc<HttpState>>,
    params: Result<Query<UserParams>, QueryRejection>,
) -> Reply {
    let Query(params) = with_body!(params);
    run(
        &state,
        EngineRequest::ListTrackedQueries {
            user_id: params.user_id,
        },
    )
    .await
}

pub async fn get_tracked_handler(
    State(state): State<Arc<HttpState>>,
    Path(raw): Path<String>,
    params: Result<Query<GetTrackedParams>, QueryRejection>,
) -> Reply {
    let query_id = with_id!(raw);
    let Query(params) = with_body!(params);
    run(
        &state,
        EngineRequest::GetTrackedQuery {
            query_id,
            user_id: params.user_id,
            include_history: params.include_history,
        },
    )
    .await
}

pub async fn tracked_status_handler(
    State(state): State<Arc<HttpState>>,
    Path(raw): Path<String>,
    body: Result<Json<StatusBody>, JsonRejection>,
) -> Reply {
    let query_id = with_id!(raw);
    let Json(body) = with_body!(body);
    let Some(is_active) = body.is_active else {
        return invalid_request("is_active is required".to_string());
    };
    run(
        &state,
        EngineRequest::UpdateTrackedQueryStatus {
            query_id,
            user_id: body.user_id,
            is_active,
        },
    )
    .await
}

pub async fn delete_tracked_handler(
    State(state): State<Arc<HttpState>>,
    Path(raw): Path<String>,
    params: Result<Query<UserParams>, QueryRejection>,
) -> Reply {
    let query_id = with_id!(raw);
    let Query(params) = with_body!(params);
    run(
        &state,
        EngineRequest::DeleteTrackedQuery {
            query_id,
            user_id: params.user_id,
        },
    )
    .await
}

pub async fn refresh_tracked_handler(
    State(state): State<Arc<HttpState>>,
    Path(raw): Path<String>,
    body: Result<Json<RefreshBody>, JsonRejection>,
) -> Reply {
    let query_id = with_id!(raw);
    let Json(body) = with_body!(body);
    run(
        &state,
        EngineRequest::RefreshTrackedQuery {
            query_id,
            user_id: body.user_id,
            summary: body.summary,
            sources: body.sources,
        },
    )
    .await
}

pub async fn refresh_active_handler(
    State(state): State<Arc<HttpState>>,
    body: Result<Json<RefreshActiveBody>, JsonRejection>,
) -> Reply {
    // The body is optional for cron callers.
    let limit = match body {
        Ok(Json(b)) => b.limit,
        Err(JsonRejection::MissingJsonContentType(_)) => None,
        Err(rejection) => return invalid_request(rejection.body_text()),
    };
    run(&state, EngineRequest::RefreshActive { limit }).await
}

// ============================================================================
// Unit tests call inner functions directly
// ============================================================================
