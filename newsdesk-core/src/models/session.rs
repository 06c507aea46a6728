use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Title reported for sessions that never received one.
pub const UNTITLED: &str = "Untitled Conversation";

/// Longest title kept on a session, in characters.
pub const TITLE_MAX_CHARS: usize = 30;

/// Longest message preview returned by conversation search, in characters.
pub const PREVIEW_MAX_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Ai,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Ai => "ai",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "ai" => Some(Role::Ai),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// A message before the store assigns its timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub role: Role,
    pub content: String,
}

impl NewMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn ai(content: impl Into<String>) -> Self {
        Self {
            role: Role::Ai,
            content: content.into(),
        }
    }

    pub fn stamp(self, timestamp: DateTime<Utc>) -> Message {
        Message {
            role: self.role,
            content: self.content,
            timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: Uuid,
    pub user_id: String,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub messages: Vec<Message>,
}

impl Session {
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.session_id,
            title: self.title.clone(),
            created_at: self.created_at,
            message_count: self.messages.len(),
        }
    }
}

/// Session Directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub message_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePreview {
    pub role: Role,
    pub timestamp: DateTime<Utc>,
    pub preview: String,
}

/// A session hit from conversation search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMatch {
    pub session_id: Uuid,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub matched_messages: Vec<MessagePreview>,
}

/// Newest first, ties broken by session id descending.
pub fn sort_newest_first(sessions: &mut [SessionSummary]) {
    sessions.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.session_id.cmp(&a.session_id))
    });
}

/// Truncates to `max` characters, replacing the tail with "..." when cut.
pub fn clip(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let keep = max.saturating_sub(3);
    let mut out: String = text.chars().take(keep).collect();
    out.push_str("...");
    out
}

/// Search preview: first 100 characters, "..." appended when longer.
pub fn preview(content: &str) -> String {
    if content.chars().count() > PREVIEW_MAX_CHARS {
        let mut out: String = content.chars().take(PREVIEW_MAX_CHARS).collect();
        out.push_str("...");
        out
    } else {
        content.to_string()
    }
}

pub fn contains_ignore_case(haystack: &str, needle_lower: &str) -> bool {
    haystack.to_lowercase().contains(needle_lower)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trips_through_str() {
        assert_eq!(Role::parse(Role::User.as_str()), Some(Role::User));
        assert_eq!(Role::parse("ai"), Some(Role::Ai));
        assert_eq!(Role::parse("assistant"), None);
        assert_eq!(serde_json::to_value(Role::Ai).unwrap(), "ai");
    }

    #[test]
    fn test_clip_keeps_short_titles() {
        assert_eq!(clip("Rust news", TITLE_MAX_CHARS), "Rust news");
        let long = "What is happening with the semiconductor export rules";
        let clipped = clip(long, TITLE_MAX_CHARS);
        assert_eq!(clipped.chars().count(), 30);
        assert!(clipped.ends_with("..."));
        assert!(clipped.starts_with("What is happening with the"));
    }

    #[test]
    fn test_preview_appends_ellipsis_past_limit() {
        let short = "short message";
        assert_eq!(preview(short), short);
        let long = "x".repeat(150);
        let p = preview(&long);
        assert_eq!(p.len(), 103);
        assert!(p.ends_with("..."));
    }

    #[test]
    fn test_sort_newest_first_is_deterministic_on_ties() {
        let at = chrono::Utc::now();
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);
        let mut list = vec![
            SessionSummary { session_id: a, title: None, created_at: at, message_count: 0 },
            SessionSummary { session_id: b, title: None, created_at: at, message_count: 0 },
        ];
        sort_newest_first(&mut list);
        assert_eq!(list[0].session_id, b);
        assert_eq!(list[1].session_id, a);
    }
}
