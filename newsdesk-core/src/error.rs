use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::llm::LlmError;
use crate::search::SearchError;

/// The kind of persisted record an ownership check or lookup refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Session,
    TrackedQuery,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Session => f.write_str("session"),
            RecordKind::TrackedQuery => f.write_str("tracked query"),
        }
    }
}

#[derive(Error, Debug)]
pub enum NewsdeskError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{kind} not found")]
    NotFound { kind: RecordKind, id: String },

    #[error("Access to {kind} denied")]
    Forbidden { kind: RecordKind, id: String },

    #[error("Unauthenticated")]
    Unauthenticated,

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl NewsdeskError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        NewsdeskError::InvalidInput(msg.into())
    }

    pub fn not_found(kind: RecordKind, id: impl ToString) -> Self {
        NewsdeskError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn forbidden(kind: RecordKind, id: impl ToString) -> Self {
        NewsdeskError::Forbidden {
            kind,
            id: id.to_string(),
        }
    }

    /// Caller-facing classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            NewsdeskError::InvalidInput(_) => ErrorKind::InvalidInput,
            NewsdeskError::NotFound { .. } => ErrorKind::NotFound,
            NewsdeskError::Forbidden { .. } => ErrorKind::Forbidden,
            NewsdeskError::Unauthenticated => ErrorKind::Unauthenticated,
            NewsdeskError::Upstream(_) => ErrorKind::Upstream,
            NewsdeskError::Database(_) | NewsdeskError::Config(_) | NewsdeskError::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }
}

impl From<LlmError> for NewsdeskError {
    fn from(e: LlmError) -> Self {
        NewsdeskError::Upstream(format!("llm: {}", e))
    }
}

impl From<SearchError> for NewsdeskError {
    fn from(e: SearchError) -> Self {
        NewsdeskError::Upstream(format!("news search: {}", e))
    }
}

/// Error classes surfaced in the response envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    Forbidden,
    Unauthenticated,
    Upstream,
    Internal,
}

impl ErrorKind {
    /// Transport status for this kind of failure.
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::InvalidInput => 400,
            ErrorKind::Unauthenticated => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::Internal => 500,
            ErrorKind::Upstream => 502,
        }
    }
}
