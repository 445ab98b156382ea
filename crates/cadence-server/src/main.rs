//! Cadence - Campaign send orchestration server
//!
//! Usage: `cadence [config.toml]`. Without a path the default locations are
//! searched; `CADENCE__*` environment variables override either.

use anyhow::{Context, Result};
use cadence_api::{create_router, AppState};
use cadence_common::config::{
    Config, DatabaseBackend, LoggingConfig, SchedulerKind, SettingsSource,
};
use cadence_core::{
    CampaignManager, ChannelTickScheduler, DryRunSender, EngineMetrics, EngineOptions,
    JobTickScheduler, MailSender, SmtpSender, SnapshotBuilder, TemplateRenderer, TickDispatcher,
    TickLoop, TickScheduler, TickWorker,
};
use cadence_storage::{
    DatabasePool, DbSettingsRepository, MemoryStore, Repositories, SettingsProvider,
    StaticSettings,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(&PathBuf::from(path))?,
        None => Config::load()?,
    };

    init_logging(&config.logging);
    info!("Starting Cadence...");

    // Storage
    let db_pool = match config.database.backend {
        DatabaseBackend::Postgres => {
            let pool = DatabasePool::new(&config.database).await?;
            if config.database.run_migrations {
                pool.migrate().await?;
                info!("Database migrations completed");
            }
            Some(pool)
        }
        DatabaseBackend::Memory => {
            warn!("Using the in-memory store; all state is lost on shutdown");
            None
        }
    };
    let repos = match &db_pool {
        Some(pool) => Repositories::postgres(pool.clone()),
        None => Repositories::memory(MemoryStore::new()),
    };

    // Send settings
    let settings: Arc<dyn SettingsProvider> = match (config.engine.settings_source, &db_pool) {
        (SettingsSource::Database, Some(pool)) => Arc::new(DbSettingsRepository::new(pool.clone())),
        (SettingsSource::Database, None) => {
            warn!("settings_source = \"database\" needs the postgres backend; using [sending]");
            Arc::new(StaticSettings::new(config.sending.clone()))
        }
        (SettingsSource::Config, _) => Arc::new(StaticSettings::new(config.sending.clone())),
    };

    // Outbound transport
    let sender: Arc<dyn MailSender> = if config.smtp.dry_run {
        warn!("SMTP dry run enabled; messages are logged, not delivered");
        Arc::new(DryRunSender::new(
            config.server.hostname.clone(),
            config.smtp.permalink_base_url.clone(),
        ))
    } else {
        info!(
            "Relaying outbound mail through {}:{}",
            config.smtp.host, config.smtp.port
        );
        Arc::new(SmtpSender::new(&config.smtp, config.server.hostname.clone())?)
    };

    if config.engine.unsubscribe_secret.is_empty() {
        warn!("engine.unsubscribe_secret is empty; unsubscribe links are forgeable");
    }
    let renderer = TemplateRenderer::new(
        config.engine.unsubscribe_base_url.clone(),
        &config.engine.unsubscribe_secret,
    )?;
    let metrics = EngineMetrics::new().context("Failed to register metrics")?;

    // Tick scheduling. The in-process loop is the only choice without a
    // database.
    let use_jobs = config.engine.scheduler == SchedulerKind::Jobs && db_pool.is_some();
    let (scheduler, tick_rx) = if use_jobs {
        let scheduler: Arc<dyn TickScheduler> =
            Arc::new(JobTickScheduler::new(repos.jobs.clone()));
        (scheduler, None)
    } else {
        let (channel, rx) = ChannelTickScheduler::channel();
        let scheduler: Arc<dyn TickScheduler> = Arc::new(channel);
        (scheduler, Some(rx))
    };

    let manager = CampaignManager::new(
        repos.clone(),
        settings,
        scheduler,
        sender,
        SnapshotBuilder::new(repos.contacts.clone(), renderer),
        metrics,
    )
    .with_options(EngineOptions::from_config(&config.engine));
    let dispatcher = TickDispatcher::new(Arc::new(manager));

    let tick_handle: JoinHandle<()> = match tick_rx {
        Some(rx) => {
            info!("Using in-process tick scheduling");
            let tick_loop = TickLoop::new(rx, dispatcher.clone());
            tokio::spawn(tick_loop.run())
        }
        None => {
            info!(
                "Using job queue tick scheduling (poll every {}s)",
                config.engine.poll_interval_secs
            );
            let worker = TickWorker::new(repos.jobs.clone(), dispatcher.clone())
                .with_poll_interval(config.engine.poll_interval_secs);
            tokio::spawn(async move { worker.run().await })
        }
    };

    // API server
    let mut state = AppState::new(dispatcher);
    if let Some(pool) = db_pool {
        state = state.with_db_pool(pool);
    }
    let app = create_router(state, &config.api.cors_origins);

    let addr = format!("{}:{}", config.server.bind_address, config.api.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind API server to {}", addr))?;
    info!("API server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tick_handle.abort();
    info!("Cadence shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},cadence=debug", config.level)));

    let registry = tracing_subscriber::registry().with(filter);
    if config.format == "text" {
        registry
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    } else {
        registry.with(fmt::layer().json()).init();
    }
}
