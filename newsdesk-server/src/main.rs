use std::sync::Arc;

use clap::Parser;
use newsdesk_core::config::StorageBackend;
use newsdesk_core::NewsdeskConfig;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use newsdesk_server::store::{MemoryStore, PgStore};
use newsdesk_server::subsystems::agent::NewsAgent;
use newsdesk_server::Engine;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "newsdesk.toml")]
    config: String,

    /// Check database connectivity and exit
    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Init logging
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    // Load config
    let config = match NewsdeskConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    let (engine, pool) = match config.storage.backend {
        StorageBackend::Postgres => {
            let pool = match newsdesk_core::db::create_pool(&config.database).await {
                Ok(p) => p,
                Err(e) => {
                    eprintln!("Failed to connect to database: {}", e);
                    std::process::exit(1);
                }
            };

            if args.health {
                match newsdesk_core::db::health_check(&pool).await {
                    Ok(v) => println!("✅ PostgreSQL connected: {}", v),
                    Err(e) => {
                        println!("❌ PostgreSQL connection failed: {}", e);
                        std::process::exit(1);
                    }
                }
                println!("✅ Newsdesk DB health check passed");
                return Ok(());
            }

            newsdesk_core::db::ensure_schema(&pool).await?;
            let store = Arc::new(PgStore::new(pool.clone()));
            (
                Engine::new(store.clone(), store, config.limits.clone()),
                Some(pool),
            )
        }
        StorageBackend::Memory => {
            if args.health {
                println!("✅ In-memory storage, no database to check");
                return Ok(());
            }
            tracing::warn!("Using in-memory storage; state is lost on exit");
            let store = Arc::new(MemoryStore::new());
            (Engine::new(store.clone(), store, config.limits.clone()), None)
        }
    };

    let engine = match NewsAgent::from_config(&config) {
        Ok(agent) => engine.with_assistant(Arc::new(agent)),
        Err(e) => {
            tracing::warn!(error = %e, "News agent disabled; ask and upstream refresh will fail");
            engine
        }
    };
    let engine = Arc::new(engine);

    if !config.http.enabled {
        anyhow::bail!("HTTP API is disabled in {}; nothing to serve", args.config);
    }

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    tracing::info!(storage = engine.backend(), "Newsdesk server starting");
    newsdesk_server::http::start_http_server(engine, pool, &config.http, tx.subscribe()).await?;

    Ok(())
}
