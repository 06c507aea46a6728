//! News search collaborator behind the `NewsSearch` trait.
//!
//! `SerperClient` calls the Serper search API and returns its organic results
//! (falling back to the `news` block) as ranked `Article`s.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio_retry::RetryIf;

use crate::config::SearchConfig;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    /// 1-based rank in the result list.
    #[serde(default)]
    pub position: u32,
}

#[async_trait]
pub trait NewsSearch: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Article>, SearchError>;

    fn name(&self) -> &str;
}

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("HTTP request failed: {0}")]
    Http(reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Missing API key")]
    MissingApiKey,

    #[error("All {attempts} attempts failed: {last}")]
    RetryExhausted { attempts: usize, last: String },
}

impl From<reqwest::Error> for SearchError {
    fn from(e: reqwest::Error) -> Self {
        SearchError::Http(e.without_url())
    }
}

impl SearchError {
    pub fn is_retryable(&self) -> bool {
        match self {
            SearchError::Http(e) => !e.is_decode(),
            SearchError::Api { code, .. } => *code == 429 || *code >= 500,
            _ => false,
        }
    }
}

#[derive(Debug, Serialize)]
struct SerperRequest<'a> {
    q: &'a str,
    num: usize,
}

#[derive(Debug, Deserialize)]
struct SerperResponse {
    #[serde(default)]
    organic: Vec<Article>,
    #[serde(default)]
    news: Vec<Article>,
}

#[derive(Debug, Clone)]
pub struct SerperClient {
    client: Client,
    api_key: String,
    base_url: String,
    retry: RetryPolicy,
}

impl SerperClient {
    /// Build a client from config. The key falls back to `SERPER_API_KEY`.
    pub fn new(config: &SearchConfig, api_key: Option<String>) -> Result<Self, SearchError> {
        let api_key = api_key
            .or_else(|| std::env::var("SERPER_API_KEY").ok())
            .unwrap_or_default();
        if api_key.is_empty() {
            return Err(SearchError::MissingApiKey);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            retry: config.retry.clone(),
        })
    }

    async fn search_once(&self, query: &str, limit: usize) -> Result<Vec<Article>, SearchError> {
        let url = format!("{}/search", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("X-API-KEY", &self.api_key)
            .json(&SerperRequest { q: query, num: limit })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            tracing::error!(code = status.as_u16(), "Serper API error");
            return Err(SearchError::Api {
                code: status.as_u16(),
                message,
            });
        }

        let body: SerperResponse = response.json().await?;
        let results = if body.organic.is_empty() {
            body.news
        } else {
            body.organic
        };

        Ok(results
            .into_iter()
            .take(limit)
            .enumerate()
            .map(|(i, mut a)| {
                a.position = i as u32 + 1;
                a
            })
            .collect())
    }
}

#[async_trait]
impl NewsSearch for SerperClient {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Article>, SearchError> {
        let result = RetryIf::spawn(
            self.retry.strategy(),
            || self.search_once(query, limit),
            |e: &SearchError| e.is_retryable(),
        )
        .await;

        match result {
            Ok(articles) => {
                tracing::debug!(count = articles.len(), "News search complete");
                Ok(articles)
            }
            Err(e) if e.is_retryable() => {
                tracing::error!(
                    attempts = self.retry.attempts(),
                    error = %e,
                    "All news search retry attempts failed"
                );
                Err(SearchError::RetryExhausted {
                    attempts: self.retry.attempts(),
                    last: e.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    fn name(&self) -> &str {
        "serper"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: String) -> SearchConfig {
        SearchConfig {
            base_url,
            results_limit: 5,
            retry: RetryPolicy {
                max_retries: 1,
                retry_delay_ms: 1,
                max_delay_ms: 5,
            },
        }
    }

    #[tokio::test]
    async fn test_search_sends_key_and_ranks_results() {
        let mock_server = MockServer::start().await;
        let client = SerperClient::new(&test_config(mock_server.uri()), Some("serper-key".into()))
            .unwrap();

        Mock::given(method("POST"))
            .and(path("/search"))
            .and(header("X-API-KEY", "serper-key"))
            .and(body_json(serde_json::json!({ "q": "rust adoption", "num": 2 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "organic": [
                    { "title": "Rust in the kernel", "link": "https://a.example", "snippet": "Linux merges more Rust." },
                    { "title": "Rust at work", "link": "https://b.example", "snippet": "Teams adopt Rust.", "date": "2 days ago" },
                    { "title": "Extra", "link": "https://c.example", "snippet": "Dropped by limit." }
                ]
            })))
            .mount(&mock_server)
            .await;

        let articles = client.search("rust adoption", 2).await.unwrap();
        assert_eq!(articles.len(), 2);
        assert_eq!(articles[0].position, 1);
        assert_eq!(articles[1].position, 2);
        assert_eq!(articles[1].date.as_deref(), Some("2 days ago"));
    }

    #[tokio::test]
    async fn test_falls_back_to_news_block() {
        let mock_server = MockServer::start().await;
        let client = SerperClient::new(&test_config(mock_server.uri()), Some("k".into())).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "news": [{ "title": "Only news", "link": "https://n.example", "snippet": "s", "source": "Wire" }]
            })))
            .mount(&mock_server)
            .await;

        let articles = client.search("anything", 5).await.unwrap();
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].source.as_deref(), Some("Wire"));
    }

    #[tokio::test]
    async fn test_server_errors_exhaust_retries() {
        let mock_server = MockServer::start().await;
        let client = SerperClient::new(&test_config(mock_server.uri()), Some("k".into())).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(2)
            .mount(&mock_server)
            .await;

        match client.search("q", 5).await {
            Err(SearchError::RetryExhausted { attempts, .. }) => assert_eq!(attempts, 2),
            other => panic!("Expected RetryExhausted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unauthorized_fails_fast() {
        let mock_server = MockServer::start().await;
        let client = SerperClient::new(&test_config(mock_server.uri()), Some("bad".into())).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("Unauthorized"))
            .expect(1)
            .mount(&mock_server)
            .await;

        assert!(matches!(
            client.search("q", 5).await,
            Err(SearchError::Api { code: 403, .. })
        ));
    }
}
