use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

use chat_relay_server::build_router;
use chat_relay_server::config::{Settings, StorageBackend};
use chat_relay_server::database::{DbPool, PgHistoryStore};
use chat_relay_server::logging::{
    init_telemetry, ActivityLogger, LoggerConfig, PgActivitySink, TracingSink,
};
use chat_relay_server::services::{
    ConversationOrchestrator, HistoryStore, HttpTransport, InMemoryHistoryStore,
    RetentionSweeper, RetryPolicy, UpstreamClient,
};
use chat_relay_server::state::AppState;

#[derive(Parser, Debug)]
#[command(
    name = "chat-relay-server",
    version,
    about = "Conversation relay in front of an OpenAI-compatible completion endpoint"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server (default)
    Serve,

    /// Delete stored turns older than the retention window
    Purge {
        /// Overrides `retention.max_age_hours`
        #[arg(long)]
        older_than_hours: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load()?;
    let _log_guard = init_telemetry(&settings.logging);
    info!("Configuration loaded (storage={:?})", settings.storage.backend);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(settings).await,
        Command::Purge { older_than_hours } => purge(settings, older_than_hours).await,
    }
}

struct Storage {
    store: Arc<dyn HistoryStore>,
    pool: Option<DbPool>,
}

async fn open_storage(settings: &Settings) -> Result<Storage> {
    let limit = settings.conversation.history_limit;
    match settings.storage.backend {
        StorageBackend::Memory => Ok(Storage {
            store: Arc::new(InMemoryHistoryStore::new(limit)),
            pool: None,
        }),
        StorageBackend::Postgres => {
            let pool = DbPool::new(&settings.storage).await?;
            let store = PgHistoryStore::new(pool.clone(), limit);
            store
                .ensure_schema()
                .await
                .context("Failed to prepare conversation_turns table")?;
            info!("PostgreSQL history store ready");
            Ok(Storage {
                store: Arc::new(store),
                pool: Some(pool),
            })
        }
    }
}

async fn serve(settings: Settings) -> Result<()> {
    let storage = open_storage(&settings).await?;

    let logger = match &storage.pool {
        Some(pool) => {
            let sink = PgActivitySink::new(pool.get_pool().clone());
            sink.ensure_schema().await?;
            ActivityLogger::new(Arc::new(sink), LoggerConfig::default())
        }
        None => ActivityLogger::new(Arc::new(TracingSink), LoggerConfig::default()),
    };

    let transport = HttpTransport::from_config(&settings.upstream)
        .context("Failed to build upstream HTTP client")?;
    let upstream = UpstreamClient::new(
        Arc::new(transport),
        RetryPolicy::from_config(&settings.upstream),
    );
    info!(
        "Upstream: {} (timeout={}s, attempts={}, backoff={:?})",
        settings.upstream.endpoint_url(),
        settings.upstream.timeout_seconds,
        settings.upstream.max_attempts,
        settings.upstream.backoff
    );

    let orchestrator = ConversationOrchestrator::new(
        storage.store.clone(),
        upstream,
        settings.completion.clone(),
        &settings.conversation,
        logger.clone(),
    );

    let sweeper = settings.retention.enabled.then(|| {
        RetentionSweeper::from_config(storage.store.clone(), &settings.retention)
            .with_logger(logger.clone())
            .spawn()
    });

    let app = build_router(AppState::new(orchestrator));

    let addr = SocketAddr::from((
        settings.server.host.parse::<std::net::IpAddr>()?,
        settings.server.port,
    ));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = sweeper {
        handle.abort();
    }
    info!("Server stopped");
    Ok(())
}

async fn purge(mut settings: Settings, older_than_hours: Option<u64>) -> Result<()> {
    if let Some(hours) = older_than_hours {
        settings.retention.max_age_hours = hours;
    }
    if settings.storage.backend == StorageBackend::Memory {
        warn!("Memory backend holds nothing between runs; nothing to purge");
        return Ok(());
    }

    let storage = open_storage(&settings).await?;
    let sweeper = RetentionSweeper::from_config(storage.store, &settings.retention);
    let deleted = sweeper.purge_once(Utc::now()).await?;
    info!(
        "Purged {} turns older than {}h",
        deleted, settings.retention.max_age_hours
    );
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
