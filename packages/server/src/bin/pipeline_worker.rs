// Main entry point for the pipeline worker

use std::sync::Arc;

use anyhow::{Context, Result};
use server_core::domains::build_job_registry;
use server_core::domains::comments::{LexiconAnalyzer, PostgresCommentStore};
use server_core::domains::tasks::PostgresTaskStore;
use server_core::kernel::clock::SystemClock;
use server_core::kernel::jobs::{PostgresJobQueue, WorkerPool};
use server_core::kernel::{start_scheduler, ServerDeps, StaticCredentials};
use server_core::Config;
use social_api_client::SocialApiClient;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,server_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting comment harvest pipeline worker");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!("Configuration loaded");

    // Connect to database
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections((config.worker_count as u32).saturating_add(5))
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connected");

    // Run migrations
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Migrations complete");

    let deps = Arc::new(ServerDeps::new(
        Arc::new(PostgresTaskStore::new(pool.clone())),
        Arc::new(PostgresJobQueue::new(pool.clone(), config.queue_config())),
        Arc::new(PostgresCommentStore::new(pool.clone())),
        SocialApiClient::new(config.client_config()),
        Arc::new(StaticCredentials::new(config.social_api_token.clone())),
        Arc::new(LexiconAnalyzer::new()),
        config.pipeline_config(),
        Arc::new(SystemClock),
    ));

    let mut scheduler = start_scheduler(deps.clone(), config.retention())
        .await
        .context("Failed to start scheduler")?;

    let registry = Arc::new(build_job_registry());
    let workers = WorkerPool::new(registry, deps, config.worker_pool_config());

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown signal received"),
            Err(e) => tracing::error!("Failed to listen for shutdown signal: {}", e),
        }
        signal.cancel();
    });

    workers.run(shutdown).await.context("Worker pool error")?;

    if let Err(e) = scheduler.shutdown().await {
        tracing::warn!("Scheduler shutdown failed: {}", e);
    }

    tracing::info!("Pipeline worker stopped");
    Ok(())
}
