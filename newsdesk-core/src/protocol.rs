//! Logical operations exposed to the transport layer, and the uniform
//! `{success, ...}` response envelope they return.

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{ErrorKind, NewsdeskError};
use crate::models::Sources;

/// Protocol identifier reported by `/version`.
pub const PROTOCOL: &str = "newsdesk/1";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum EngineRequest {
    Ping,
    StartSession {
        user_id: String,
    },
    AskInSession {
        session_id: Uuid,
        user_id: String,
        query: String,
    },
    AskDefault {
        user_id: String,
        query: String,
    },
    ListSessions {
        user_id: String,
    },
    GetSessionHistory {
        session_id: Uuid,
        user_id: String,
    },
    ClearSession {
        session_id: Uuid,
        user_id: String,
    },
    DeleteSession {
        session_id: Uuid,
        user_id: String,
    },
    SearchSessions {
        user_id: String,
        query: String,
    },
    CreateTrackedQuery {
        user_id: String,
        query_text: String,
    },
    ListTrackedQueries {
        user_id: String,
    },
    GetTrackedQuery {
        query_id: Uuid,
        user_id: String,
        #[serde(default)]
        include_history: bool,
    },
    UpdateTrackedQueryStatus {
        query_id: Uuid,
        user_id: String,
        is_active: bool,
    },
    DeleteTrackedQuery {
        query_id: Uuid,
        user_id: String,
    },
    /// Without `summary` the engine generates one through the news agent.
    RefreshTrackedQuery {
        query_id: Uuid,
        user_id: String,
        #[serde(default)]
        summary: Option<String>,
        #[serde(default)]
        sources: Option<Sources>,
    },
    RefreshActive {
        limit: Option<u32>,
    },
}

impl EngineRequest {
    /// Operation name used in logs.
    pub fn action(&self) -> &'static str {
        match self {
            EngineRequest::Ping => "ping",
            EngineRequest::StartSession { .. } => "start_session",
            EngineRequest::AskInSession { .. } => "ask_in_session",
            EngineRequest::AskDefault { .. } => "ask_default",
            EngineRequest::ListSessions { .. } => "list_sessions",
            EngineRequest::GetSessionHistory { .. } => "get_session_history",
            EngineRequest::ClearSession { .. } => "clear_session",
            EngineRequest::DeleteSession { .. } => "delete_session",
            EngineRequest::SearchSessions { .. } => "search_sessions",
            EngineRequest::CreateTrackedQuery { .. } => "create_tracked_query",
            EngineRequest::ListTrackedQueries { .. } => "list_tracked_queries",
            EngineRequest::GetTrackedQuery { .. } => "get_tracked_query",
            EngineRequest::UpdateTrackedQueryStatus { .. } => "update_tracked_query_status",
            EngineRequest::DeleteTrackedQuery { .. } => "delete_tracked_query",
            EngineRequest::RefreshTrackedQuery { .. } => "refresh_tracked_query",
            EngineRequest::RefreshActive { .. } => "refresh_active",
        }
    }
}

/// Uniform result envelope.
///
/// Serializes as `{"success": true, ...payload}` or
/// `{"success": false, "error": ..., "kind": ..., "details"?: ...}`.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineResponse {
    Success(Map<String, Value>),
    Failure {
        kind: ErrorKind,
        error: String,
        details: Option<String>,
    },
}

impl EngineResponse {
    /// Wrap a payload. Objects are flattened into the envelope, anything
    /// else lands under `data`.
    pub fn ok(payload: Value) -> Self {
        match payload {
            Value::Object(map) => EngineResponse::Success(map),
            other => {
                let mut map = Map::new();
                map.insert("data".to_string(), other);
                EngineResponse::Success(map)
            }
        }
    }

    pub fn err(kind: ErrorKind, error: impl Into<String>) -> Self {
        EngineResponse::Failure {
            kind,
            error: error.into(),
            details: None,
        }
    }

    pub fn pong() -> Self {
        Self::ok(serde_json::json!({"pong": true}))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, EngineResponse::Success(_))
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            EngineResponse::Success(_) => None,
            EngineResponse::Failure { kind, .. } => Some(*kind),
        }
    }

    pub fn status_code(&self) -> u16 {
        self.kind().map(|k| k.status_code()).unwrap_or(200)
    }

    pub fn data(&self) -> Option<&Map<String, Value>> {
        match self {
            EngineResponse::Success(map) => Some(map),
            EngineResponse::Failure { .. } => None,
        }
    }
}

impl From<NewsdeskError> for EngineResponse {
    fn from(e: NewsdeskError) -> Self {
        match e.kind() {
            ErrorKind::Internal => EngineResponse::Failure {
                kind: ErrorKind::Internal,
                error: "An internal error occurred".to_string(),
                details: None,
            },
            ErrorKind::Upstream => EngineResponse::Failure {
                kind: ErrorKind::Upstream,
                error: "An upstream service failed".to_string(),
                details: Some(e.to_string()),
            },
            kind => EngineResponse::err(kind, e.to_string()),
        }
    }
}

impl Serialize for EngineResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            EngineResponse::Success(data) => {
                let mut map = serializer.serialize_map(Some(data.len() + 1))?;
                map.serialize_entry("success", &true)?;
                for (k, v) in data.iter().filter(|(k, _)| k.as_str() != "success") {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
            EngineResponse::Failure {
                kind,
                error,
                details,
            } => {
                let mut map = serializer.serialize_map(None)?;
                map.serialize_entry("success", &false)?;
                map.serialize_entry("error", error)?;
                map.serialize_entry("kind", kind)?;
                if let Some(details) = details {
                    map.serialize_entry("details", details)?;
                }
                map.end()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RecordKind;
    use serde_json::json;

    #[test]
    fn test_success_flattens_payload() {
        let resp = EngineResponse::ok(json!({"session_id": "abc"}));
        let v = serde_json::to_value(&resp).unwrap();
        assert_eq!(v, json!({"success": true, "session_id": "abc"}));
        assert_eq!(resp.status_code(), 200);
    }

    #[test]
    fn test_non_object_payload_goes_under_data() {
        let v = serde_json::to_value(EngineResponse::ok(json!([1, 2]))).unwrap();
        assert_eq!(v, json!({"success": true, "data": [1, 2]}));
    }

    #[test]
    fn test_failure_shape() {
        let resp: EngineResponse =
            NewsdeskError::forbidden(RecordKind::Session, Uuid::nil()).into();
        let v = serde_json::to_value(&resp).unwrap();
        assert_eq!(v["success"], false);
        assert_eq!(v["kind"], "forbidden");
        assert!(v["error"].is_string());
        assert!(v.get("details").is_none());
        assert_eq!(resp.status_code(), 403);
    }

    #[test]
    fn test_internal_errors_are_not_leaked() {
        let resp: EngineResponse = NewsdeskError::Internal("pool timed out on 10.0.0.3".into()).into();
        let v = serde_json::to_value(&resp).unwrap();
        assert_eq!(v["kind"], "internal");
        assert!(!v["error"].as_str().unwrap().contains("10.0.0.3"));
    }

    #[test]
    fn test_upstream_carries_details() {
        let resp: EngineResponse = NewsdeskError::Upstream("llm: quota".into()).into();
        let v = serde_json::to_value(&resp).unwrap();
        assert_eq!(v["kind"], "upstream");
        assert_eq!(resp.status_code(), 502);
        assert!(v["details"].as_str().unwrap().contains("quota"));
    }

    #[test]
    fn test_request_tagging() {
        let req: EngineRequest = serde_json::from_value(json!({
            "action": "get_tracked_query",
            "query_id": Uuid::nil(),
            "user_id": "u1"
        }))
        .unwrap();
        match &req {
            EngineRequest::GetTrackedQuery { include_history, .. } => assert!(!include_history),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(req.action(), "get_tracked_query");
    }
}
