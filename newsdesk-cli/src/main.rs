//! newsdesk-cli: command-line client for the Newsdesk HTTP API
//!
//! Every subcommand maps to one endpoint. Responses are printed as pretty
//! JSON; a `success: false` envelope exits with status 1.
//!
//! # Subcommands
//! - `ask`, `start-session`, `sessions`, `history`, `clear`, `delete-session`, `search`
//! - `track`, `tracked`, `show`, `pause`, `resume`, `untrack`, `refresh`
//! - `refresh-active`: batch refresh, meant for cron
//! - `status`: show server health

use clap::{Parser, Subcommand};
use serde_json::{json, Value};

const DEFAULT_SERVER: &str = "http://127.0.0.1:8780";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "newsdesk-cli", version, about = "Newsdesk sessions and tracked queries")]
struct Cli {
    /// Newsdesk HTTP server URL (overrides NEWSDESK_HTTP_URL env var)
    #[arg(long, env = "NEWSDESK_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Ask a question, in a given session or the default one
    Ask {
        #[arg(short, long, env = "NEWSDESK_USER")]
        user: String,
        #[arg(short, long)]
        session: Option<String>,
        query: String,
    },

    /// Start a new empty session
    StartSession {
        #[arg(short, long, env = "NEWSDESK_USER")]
        user: String,
    },

    /// List sessions, newest first
    Sessions {
        #[arg(short, long, env = "NEWSDESK_USER")]
        user: String,
    },

    /// Print a session's messages in order
    History {
        #[arg(short, long, env = "NEWSDESK_USER")]
        user: String,
        session: String,
    },

    /// Empty a session's log
    Clear {
        #[arg(short, long, env = "NEWSDESK_USER")]
        user: String,
        session: String,
    },

    /// Delete a session
    DeleteSession {
        #[arg(short, long, env = "NEWSDESK_USER")]
        user: String,
        session: String,
    },

    /// Search session titles and messages
    Search {
        #[arg(short, long, env = "NEWSDESK_USER")]
        user: String,
        query: String,
    },

    /// Start tracking a topic
    Track {
        #[arg(short, long, env = "NEWSDESK_USER")]
        user: String,
        query: String,
    },

    /// List tracked queries
    Tracked {
        #[arg(short, long, env = "NEWSDESK_USER")]
        user: String,
    },

    /// Show one tracked query
    Show {
        #[arg(short, long, env = "NEWSDESK_USER")]
        user: String,
        query_id: String,
        /// Include the snapshot history
        #[arg(long)]
        history: bool,
    },

    /// Deactivate a tracked query
    Pause {
        #[arg(short, long, env = "NEWSDESK_USER")]
        user: String,
        query_id: String,
    },

    /// Reactivate a tracked query
    Resume {
        #[arg(short, long, env = "NEWSDESK_USER")]
        user: String,
        query_id: String,
    },

    /// Stop tracking and delete the history
    Untrack {
        #[arg(short, long, env = "NEWSDESK_USER")]
        user: String,
        query_id: String,
    },

    /// Fetch a fresh digest for one tracked query
    Refresh {
        #[arg(short, long, env = "NEWSDESK_USER")]
        user: String,
        query_id: String,
    },

    /// Refresh a batch of active tracked queries
    RefreshActive {
        #[arg(short = 'n', long)]
        limit: Option<u32>,
    },

    /// Show Newsdesk server status
    Status,
}

// ============================================================================
// Request planning
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Get,
    Post,
    Patch,
    Delete,
}

/// One HTTP call: verb, path, query pairs and optional JSON body.
#[derive(Debug, PartialEq)]
pub struct Call {
    pub verb: Verb,
    pub path: String,
    pub params: Vec<(&'static str, String)>,
    pub body: Option<Value>,
}

impl Call {
    fn new(verb: Verb, path: impl Into<String>) -> Self {
        Self {
            verb,
            path: path.into(),
            params: Vec::new(),
            body: None,
        }
    }

    fn param(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.params.push((key, value.into()));
        self
    }

    fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Map a subcommand to its endpoint. Returns None for `status`, which is
/// rendered differently.
fn plan(command: Commands) -> Option<Call> {
    let call = match command {
        Commands::Ask {
            user,
            session: Some(session),
            query,
        } => Call::new(Verb::Post, format!("/sessions/{session}/ask"))
            .body(json!({ "user_id": user, "query": query })),
        Commands::Ask {
            user,
            session: None,
            query,
        } => Call::new(Verb::Post, "/ask").body(json!({ "user_id": user, "query": query })),
        Commands::StartSession { user } => {
            Call::new(Verb::Post, "/sessions").body(json!({ "user_id": user }))
        }
        Commands::Sessions { user } => Call::new(Verb::Get, "/sessions").param("user_id", user),
        Commands::History { user, session } => {
            Call::new(Verb::Get, format!("/sessions/{session}/history")).param("user_id", user)
        }
        Commands::Clear { user, session } => {
            Call::new(Verb::Post, format!("/sessions/{session}/clear"))
                .body(json!({ "user_id": user }))
        }
        Commands::DeleteSession { user, session } => {
            Call::new(Verb::Delete, format!("/sessions/{session}")).param("user_id", user)
        }
        Commands::Search { user, query } => Call::new(Verb::Get, "/sessions/search")
            .param("user_id", user)
            .param("query", query),
        Commands::Track { user, query } => Call::new(Verb::Post, "/tracked")
            .body(json!({ "user_id": user, "query_text": query })),
        Commands::Tracked { user } => Call::new(Verb::Get, "/tracked").param("user_id", user),
        Commands::Show {
            user,
            query_id,
            history,
        } => Call::new(Verb::Get, format!("/tracked/{query_id}"))
            .param("user_id", user)
            .param("include_history", history.to_string()),
        Commands::Pause { user, query_id } => status_call(user, query_id, false),
        Commands::Resume { user, query_id } => status_call(user, query_id, true),
        Commands::Untrack { user, query_id } => {
            Call::new(Verb::Delete, format!("/tracked/{query_id}")).param("user_id", user)
        }
        Commands::Refresh { user, query_id } => {
            Call::new(Verb::Post, format!("/tracked/{query_id}/refresh"))
                .body(json!({ "user_id": user }))
        }
        Commands::RefreshActive { limit } => {
            Call::new(Verb::Post, "/tracked/refresh-active").body(json!({ "limit": limit }))
        }
        Commands::Status => return None,
    };
    Some(call)
}

fn status_call(user: String, query_id: String, is_active: bool) -> Call {
    Call::new(Verb::Patch, format!("/tracked/{query_id}/status"))
        .body(json!({ "user_id": user, "is_active": is_active }))
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

fn client() -> anyhow::Result<reqwest::blocking::Client> {
    // Asks and refreshes wait on the LLM and search upstreams.
    Ok(reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(120))
        .build()?)
}

/// Send one call and print the response. Returns whether the server
/// reported success.
fn execute(server: &str, call: Call) -> anyhow::Result<bool> {
    let client = client()?;
    let url = format!("{}{}", server, call.path);

    let builder = match call.verb {
        Verb::Get => client.get(&url),
        Verb::Post => client.post(&url),
        Verb::Patch => client.patch(&url),
        Verb::Delete => client.delete(&url),
    };
    let builder = builder.query(&call.params);
    let builder = match &call.body {
        Some(body) => builder.json(body),
        None => builder,
    };

    let resp = builder
        .send()
        .map_err(|e| anyhow::anyhow!("connection failed to {}: {}", url, e))?;
    let status = resp.status();
    let text = resp.text()?;

    let body: Value = match serde_json::from_str(&text) {
        Ok(v) => v,
        Err(_) => anyhow::bail!("server returned {}: {}", status, text),
    };
    println!("{}", serde_json::to_string_pretty(&body)?);

    Ok(is_success(&body))
}

fn is_success(body: &Value) -> bool {
    body["success"].as_bool().unwrap_or(false)
}

/// Show the server status by calling GET /health.
fn do_status(server: &str) -> anyhow::Result<bool> {
    let url = format!("{}/health", server);
    let resp = client()?
        .get(&url)
        .send()
        .map_err(|e| anyhow::anyhow!("cannot reach {}: {}", url, e))?;

    let healthy = resp.status().is_success();
    let body: Value = resp.json().unwrap_or_default();
    println!("Newsdesk server: {}", body["status"].as_str().unwrap_or("unknown"));
    println!("Version:         {}", body["version"].as_str().unwrap_or("?"));
    println!("Storage:         {}", body["storage"].as_str().unwrap_or("?"));
    if let Some(pg) = body["postgresql"].as_str() {
        println!("PostgreSQL:      {}", pg);
    }
    Ok(healthy)
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();

    let result = match plan(cli.command) {
        Some(call) => execute(&server, call),
        None => do_status(&server),
    };

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("newsdesk-cli: {}", e);
            std::process::exit(1);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Commands {
        let mut argv = vec!["newsdesk-cli"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap().command
    }

    #[test]
    fn test_ask_without_session_uses_default_endpoint() {
        let call = plan(parse(&["ask", "--user", "u1", "latest chip news"])).unwrap();
        assert_eq!(call.verb, Verb::Post);
        assert_eq!(call.path, "/ask");
        assert_eq!(
            call.body.unwrap(),
            json!({ "user_id": "u1", "query": "latest chip news" })
        );
    }

    #[test]
    fn test_ask_with_session_targets_that_session() {
        let call = plan(parse(&["ask", "-u", "u1", "-s", "abc", "more?"])).unwrap();
        assert_eq!(call.path, "/sessions/abc/ask");
    }

    #[test]
    fn test_user_goes_in_query_string_for_reads() {
        let call = plan(parse(&["history", "--user", "u1", "abc"])).unwrap();
        assert_eq!(call.verb, Verb::Get);
        assert_eq!(call.path, "/sessions/abc/history");
        assert_eq!(call.params, vec![("user_id", "u1".to_string())]);
        assert!(call.body.is_none());
    }

    #[test]
    fn test_search_passes_query() {
        let call = plan(parse(&["search", "--user", "u1", "steel"])).unwrap();
        assert_eq!(
            call.params,
            vec![("user_id", "u1".to_string()), ("query", "steel".to_string())]
        );
    }

    #[test]
    fn test_show_history_flag() {
        let call = plan(parse(&["show", "--user", "u1", "q1", "--history"])).unwrap();
        assert_eq!(call.path, "/tracked/q1");
        assert!(call
            .params
            .contains(&("include_history", "true".to_string())));
    }

    #[test]
    fn test_pause_and_resume_patch_status() {
        let pause = plan(parse(&["pause", "--user", "u1", "q1"])).unwrap();
        assert_eq!(pause.verb, Verb::Patch);
        assert_eq!(pause.path, "/tracked/q1/status");
        assert_eq!(pause.body.unwrap()["is_active"], false);

        let resume = plan(parse(&["resume", "--user", "u1", "q1"])).unwrap();
        assert_eq!(resume.body.unwrap()["is_active"], true);
    }

    #[test]
    fn test_untrack_and_delete_session_use_delete() {
        let untrack = plan(parse(&["untrack", "--user", "u1", "q1"])).unwrap();
        assert_eq!(untrack.verb, Verb::Delete);
        assert_eq!(untrack.path, "/tracked/q1");

        let delete = plan(parse(&["delete-session", "--user", "u1", "s1"])).unwrap();
        assert_eq!(delete.verb, Verb::Delete);
        assert_eq!(delete.path, "/sessions/s1");
    }

    #[test]
    fn test_refresh_active_limit_is_optional() {
        let call = plan(parse(&["refresh-active"])).unwrap();
        assert_eq!(call.body.unwrap(), json!({ "limit": null }));

        let call = plan(parse(&["refresh-active", "-n", "10"])).unwrap();
        assert_eq!(call.body.unwrap(), json!({ "limit": 10 }));
    }

    #[test]
    fn test_status_is_not_planned() {
        assert!(plan(parse(&["status"])).is_none());
    }

    #[test]
    fn test_is_success_reads_envelope() {
        assert!(is_success(&json!({ "success": true, "count": 0 })));
        assert!(!is_success(&json!({ "success": false, "error": "nope" })));
        assert!(!is_success(&json!({ "status": "healthy" })));
    }
}
