use newsdesk_core::protocol::{EngineRequest, EngineResponse};
use newsdesk_core::{ErrorKind, NewsdeskError};
use serde_json::{json, Value};

use crate::engine::Engine;

/// Dispatches one logical operation and wraps the outcome in the response
/// envelope.
pub async fn handle_request(request: EngineRequest, engine: &Engine) -> EngineResponse {
    let action = request.action();
    match request {
        EngineRequest::Ping => EngineResponse::pong(),
        EngineRequest::StartSession { user_id } => respond(
            action,
            engine.start_session(&user_id).await,
            |s| json!({ "session_id": s.session_id, "created_at": s.created_at }),
        ),
        EngineRequest::AskInSession {
            session_id,
            user_id,
            query,
        } => respond(
            action,
            engine.ask_in_session(session_id, &user_id, &query).await,
            ask_payload,
        ),
        EngineRequest::AskDefault { user_id, query } => respond(
            action,
            engine.ask_default(&user_id, &query).await,
            ask_payload,
        ),
        EngineRequest::ListSessions { user_id } => respond(
            action,
            engine.list_sessions(&user_id).await,
            |sessions| json!({ "count": sessions.len(), "sessions": sessions }),
        ),
        EngineRequest::GetSessionHistory {
            session_id,
            user_id,
        } => respond(
            action,
            engine.get_session(session_id, &user_id).await,
            |s| {
                json!({
                    "session_id": s.session_id,
                    "title": s.title,
                    "created_at": s.created_at,
                    "history": s.messages,
                })
            },
        ),
        EngineRequest::ClearSession {
            session_id,
            user_id,
        } => respond(
            action,
            engine.clear_session(session_id, &user_id).await,
            |_| json!({ "message": "Conversation history cleared", "session_id": session_id }),
        ),
        EngineRequest::DeleteSession {
            session_id,
            user_id,
        } => respond(
            action,
            engine.delete_session(session_id, &user_id).await,
            |_| json!({ "message": "Session deleted", "session_id": session_id }),
        ),
        EngineRequest::SearchSessions { user_id, query } => respond(
            action,
            engine.search_sessions(&user_id, &query).await,
            |results| json!({ "count": results.len(), "results": results }),
        ),
        EngineRequest::CreateTrackedQuery {
            user_id,
            query_text,
        } => respond(
            action,
            engine.create_tracked_query(&user_id, &query_text).await,
            |q| json!({ "query_id": q.query_id, "query": q }),
        ),
        EngineRequest::ListTrackedQueries { user_id } => respond(
            action,
            engine.list_tracked_queries(&user_id).await,
            |queries| json!({ "count": queries.len(), "queries": queries }),
        ),
        EngineRequest::GetTrackedQuery {
            query_id,
            user_id,
            include_history,
        } => respond(
            action,
            engine
                .get_tracked_query(query_id, &user_id, include_history)
                .await,
            |q| json!({ "query": q }),
        ),
        EngineRequest::UpdateTrackedQueryStatus {
            query_id,
            user_id,
            is_active,
        } => respond(
            action,
            engine
                .update_tracked_query_status(query_id, &user_id, is_active)
                .await,
            |q| json!({ "message": "Tracked query status updated", "query": q }),
        ),
        EngineRequest::DeleteTrackedQuery { query_id, user_id } => respond(
            action,
            engine.delete_tracked_query(query_id, &user_id).await,
            |_| json!({ "message": "Tracked query deleted", "query_id": query_id }),
        ),
        EngineRequest::RefreshTrackedQuery {
            query_id,
            user_id,
            summary,
            sources,
        } => {
            let result = match summary {
                Some(summary) => {
                    engine
                        .refresh_tracked_query(
                            query_id,
                            &user_id,
                            &summary,
                            sources.unwrap_or_default(),
                        )
                        .await
                }
                None => engine.refresh_from_upstream(query_id, &user_id).await,
            };
            respond(action, result, |snapshot| {
                json!({ "query_id": query_id, "snapshot": snapshot })
            })
        }
        EngineRequest::RefreshActive { limit } => respond(
            action,
            engine.refresh_active(limit).await,
            |report| json!({ "report": report }),
        ),
    }
}

fn ask_payload(outcome: crate::engine::AskOutcome) -> Value {
    json!({
        "session_id": outcome.session_id,
        "response": outcome.response,
        "sources": outcome.sources,
        "messages": outcome.messages,
    })
}

fn respond<T>(
    action: &'static str,
    result: Result<T, NewsdeskError>,
    payload: impl FnOnce(T) -> Value,
) -> EngineResponse {
    match result {
        Ok(value) => EngineResponse::ok(payload(value)),
        Err(e) => {
            match e.kind() {
                ErrorKind::Internal => tracing::error!(action, error = %e, "Request failed"),
                ErrorKind::Upstream => tracing::warn!(action, error = %e, "Upstream failure"),
                _ => tracing::debug!(action, error = %e, "Request rejected"),
            }
            e.into()
        }
    }
}
