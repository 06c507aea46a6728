//! News agent: composes the LLM and news search collaborators.
//!
//! The engine never calls the collaborators directly; it goes through the
//! [`Assistant`] trait so tests can script answers and digests.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

use newsdesk_core::models::{session, Message, Role, SourceRef, Sources};
use newsdesk_core::{
    Article, GeminiClient, LanguageModel, NewsSearch, NewsdeskConfig, NewsdeskError, SerperClient,
};

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub response: String,
    pub sources: Vec<Article>,
}

#[derive(Debug, Clone)]
pub struct TopicDigest {
    pub summary: String,
    pub sources: Sources,
}

#[async_trait]
pub trait Assistant: Send + Sync {
    /// Answers `query` in the context of `history` (oldest first).
    async fn answer(&self, query: &str, history: &[Message]) -> Result<Answer, NewsdeskError>;

    /// Fresh summary and sources for a tracked topic.
    async fn digest(&self, topic: &str) -> Result<TopicDigest, NewsdeskError>;

    /// Short session title for a first query. Never fails.
    async fn title_for(&self, query: &str) -> String;
}

pub struct NewsAgent {
    llm: Arc<dyn LanguageModel>,
    search: Arc<dyn NewsSearch>,
    results_limit: usize,
}

impl NewsAgent {
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        search: Arc<dyn NewsSearch>,
        results_limit: usize,
    ) -> Self {
        Self {
            llm,
            search,
            results_limit: results_limit.max(1),
        }
    }

    /// Gemini + Serper, keys from the environment.
    pub fn from_config(config: &NewsdeskConfig) -> Result<Self, NewsdeskError> {
        let llm = GeminiClient::new(&config.llm, None)?;
        let search = SerperClient::new(&config.search, None)?;
        Ok(Self::new(
            Arc::new(llm),
            Arc::new(search),
            config.search.results_limit,
        ))
    }

    /// Rewrites the question into a search query. Falls back to the raw text.
    async fn optimize_query(&self, query: &str) -> String {
        match self.llm.complete(&optimize_prompt(query)).await {
            Ok(optimized) => {
                let optimized = strip_quotes(optimized.lines().next().unwrap_or_default());
                if optimized.is_empty() {
                    query.to_string()
                } else {
                    optimized
                }
            }
            Err(e) => {
                tracing::warn!(provider = self.llm.name(), error = %e, "Query optimization failed, using raw query");
                query.to_string()
            }
        }
    }
}

#[async_trait]
impl Assistant for NewsAgent {
    async fn answer(&self, query: &str, history: &[Message]) -> Result<Answer, NewsdeskError> {
        let search_query = self.optimize_query(query).await;
        let articles = self.search.search(&search_query, self.results_limit).await?;
        tracing::debug!(
            provider = self.search.name(),
            articles = articles.len(),
            history = history.len(),
            "Composing answer"
        );

        let response = self
            .llm
            .complete(&answer_prompt(query, history, &articles))
            .await?;
        Ok(Answer {
            response,
            sources: articles,
        })
    }

    async fn digest(&self, topic: &str) -> Result<TopicDigest, NewsdeskError> {
        let articles = self.search.search(topic, self.results_limit).await?;
        let summary = self.llm.complete(&digest_prompt(topic, &articles)).await?;
        Ok(TopicDigest {
            summary,
            sources: sources_by_title(&articles),
        })
    }

    async fn title_for(&self, query: &str) -> String {
        match self.llm.complete(&title_prompt(query)).await {
            Ok(raw) => {
                let title = strip_quotes(raw.lines().next().unwrap_or_default());
                if title.is_empty() {
                    fallback_title(query)
                } else {
                    session::clip(&title, session::TITLE_MAX_CHARS)
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Title generation failed, using query prefix");
                fallback_title(query)
            }
        }
    }
}

pub fn fallback_title(query: &str) -> String {
    session::clip(query.trim(), session::TITLE_MAX_CHARS)
}

fn strip_quotes(text: &str) -> String {
    text.replace(['"', '\''], "").trim().to_string()
}

/// Keys sources by article title; repeated titles get ` (2)`, ` (3)`, ...
pub fn sources_by_title(articles: &[Article]) -> Sources {
    let mut sources = Sources::new();
    for article in articles {
        let base = if article.title.trim().is_empty() {
            article.link.clone()
        } else {
            article.title.trim().to_string()
        };
        let mut label = base.clone();
        let mut n = 2;
        while sources.contains_key(&label) {
            label = format!("{base} ({n})");
            n += 1;
        }
        sources.insert(
            label,
            SourceRef {
                link: article.link.clone(),
                snippet: article.snippet.clone(),
                position: article.position,
            },
        );
    }
    sources
}

fn optimize_prompt(query: &str) -> String {
    format!(
        "I need to search for relevant news articles about: \"{query}\"\n\n\
         Convert this into an optimized search query for a news search engine.\n\
         Include the relevant keywords, keep it concise and focused, and drop filler words.\n\
         Return only the query, with no explanation.\n\n\
         Optimized query:"
    )
}

fn article_context(articles: &[Article]) -> String {
    if articles.is_empty() {
        return "No relevant news articles found.\n".to_string();
    }
    let mut context = String::from("Here are the relevant news articles:\n\n");
    for (i, article) in articles.iter().enumerate() {
        context.push_str(&format!("{}. {}\n   {}\n", i + 1, article.title, article.snippet));
        context.push_str(&format!(
            "   Source: {}",
            article.source.as_deref().unwrap_or("Unknown source")
        ));
        if let Some(date) = article.date.as_deref().filter(|d| !d.is_empty()) {
            context.push_str(&format!(" | {date}"));
        }
        context.push_str("\n\n");
    }
    context
}

fn answer_prompt(query: &str, history: &[Message], articles: &[Article]) -> String {
    let mut prompt = String::from(
        "You are a helpful news assistant that searches for and summarizes recent news.\n\
         Be conversational and friendly. Summarize the key points, add brief insight, \
         and stay concise yet informative.\n\n",
    );
    if !history.is_empty() {
        prompt.push_str("Conversation so far:\n");
        for message in history {
            let speaker = match message.role {
                Role::User => "User",
                Role::Ai => "Assistant",
            };
            prompt.push_str(&format!("{speaker}: {}\n", message.content));
        }
        prompt.push('\n');
    }
    prompt.push_str(&article_context(articles));
    prompt.push_str(&format!("Question: {query}\nAnswer:"));
    prompt
}

fn digest_prompt(topic: &str, articles: &[Article]) -> String {
    format!(
        "Write a concise, factual summary of the latest news on \"{topic}\".\n\
         Use short declarative sentences, one development per sentence, no preamble.\n\n\
         {}Summary:",
        article_context(articles)
    )
}

fn title_prompt(query: &str) -> String {
    format!(
        "Given the following user query in a news chat application, generate a concise, \
         descriptive title (5 words or less) that captures the main topic. The title should \
         be informative but brief (30 characters max).\n\nQuery: '{query}'\n\nTitle:"
    )
}
