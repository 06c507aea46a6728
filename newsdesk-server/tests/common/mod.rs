#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use newsdesk_core::config::LimitsConfig;
use newsdesk_core::models::{Message, SourceRef, Sources};
use newsdesk_core::{Article, NewsdeskError};
use newsdesk_server::subsystems::agent::{Answer, Assistant, TopicDigest};
use newsdesk_server::Engine;

/// Assistant with canned behavior. Answers echo the query; digests pop from
/// a queue and fail once it is empty.
#[derive(Default)]
pub struct ScriptedAssistant {
    pub digests: Mutex<VecDeque<String>>,
    pub fail_answers: bool,
    pub answers: AtomicUsize,
    pub seen_history: Mutex<Vec<usize>>,
}

impl ScriptedAssistant {
    pub fn with_digests(summaries: &[&str]) -> Self {
        Self {
            digests: Mutex::new(summaries.iter().map(|s| s.to_string()).collect()),
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_answers: true,
            ..Default::default()
        }
    }
}

#[async_trait]
impl Assistant for ScriptedAssistant {
    async fn answer(&self, query: &str, history: &[Message]) -> Result<Answer, NewsdeskError> {
        self.seen_history.lock().unwrap().push(history.len());
        if self.fail_answers {
            return Err(NewsdeskError::Upstream("search API error (503)".into()));
        }
        self.answers.fetch_add(1, Ordering::SeqCst);
        Ok(Answer {
            response: format!("answer: {query}"),
            sources: vec![Article {
                title: "Example headline".into(),
                link: "https://news.example/1".into(),
                snippet: "snippet".into(),
                source: None,
                date: None,
                position: 1,
            }],
        })
    }

    async fn digest(&self, topic: &str) -> Result<TopicDigest, NewsdeskError> {
        let summary = self
            .digests
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| NewsdeskError::Upstream(format!("no digest for {topic}")))?;
        let mut sources = Sources::new();
        sources.insert(
            "Example headline".into(),
            SourceRef {
                link: "https://news.example/1".into(),
                snippet: "snippet".into(),
                position: 1,
            },
        );
        Ok(TopicDigest { summary, sources })
    }

    async fn title_for(&self, query: &str) -> String {
        newsdesk_server::subsystems::agent::fallback_title(query)
    }
}

pub fn engine_with(assistant: Arc<ScriptedAssistant>) -> Engine {
    Engine::in_memory(LimitsConfig::default()).with_assistant(assistant)
}

pub fn engine_with_limits(assistant: Arc<ScriptedAssistant>, limits: LimitsConfig) -> Engine {
    Engine::in_memory(limits).with_assistant(assistant)
}
