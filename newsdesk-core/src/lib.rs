pub mod config;
pub mod db;
pub mod differ;
pub mod error;
pub mod guard;
pub mod llm;
pub mod models;
pub mod protocol;
pub mod retry;
pub mod search;

pub use config::NewsdeskConfig;
pub use differ::{diff, SnapshotDiffer};
pub use error::{ErrorKind, NewsdeskError, RecordKind};
pub use llm::{GeminiClient, LanguageModel, LlmError};
pub use protocol::{EngineRequest, EngineResponse};
pub use retry::RetryPolicy;
pub use search::{Article, NewsSearch, SearchError, SerperClient};
