//! mediasweep - rule-driven media collection engine

use mediasweep::clients::{
    CatalogLookup, CompanionRegistry, PlexClient, RadarrClient, RemotePredicateEngine, SonarrClient,
    TmdbClient,
};
use mediasweep::core::{
    self, task_queue, ActionHandler, CollectionHandler, CollectionService, Event, EventBus,
    EventType, IdentifierResolver, ProgressReporter, Reconciler, RuleEvaluator, RuleExecutor,
    Scheduler, TaskQueue,
};
use mediasweep::db;

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration (handles CLI args, env vars, and config file)
    let config = match core::config::Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            // Print error to stderr since logging isn't initialized yet
            eprintln!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    let _logger = match core::Logger::init(&config.logging) {
        Ok(logger) => logger,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            return Err(e);
        }
    };

    info!("Starting mediasweep v{}", mediasweep::VERSION);
    info!(path = ?config.database.path, "Database configuration");
    info!(
        page_size = config.rules.page_size,
        global_schedule = %config.rules.global_schedule,
        "Rules configuration"
    );

    // Migrations run inside the constructor, before anything else touches the database
    let db = Arc::new(db::DatabaseManager::from_config(&config.database).context("opening database")?);
    info!("Database initialized successfully");

    let media_server = Arc::new(PlexClient::new(&config.media_server)?);
    let engine = Arc::new(RemotePredicateEngine::new(&config.rules_engine)?);
    let catalog: Option<Arc<dyn CatalogLookup>> = match TmdbClient::from_config(&config.tmdb)? {
        Some(client) => Some(Arc::new(client)),
        None => {
            info!("No catalog API key configured, cross-reference lookups disabled");
            None
        }
    };

    let mut companions = CompanionRegistry::new();
    for binding in &config.radarr {
        companions = companions.with_movie_manager(Arc::new(RadarrClient::new(binding)?));
        info!(name = %binding.name, url = %binding.url, "Registered movie manager");
    }
    for binding in &config.sonarr {
        companions = companions.with_show_manager(Arc::new(SonarrClient::new(binding)?));
        info!(name = %binding.name, url = %binding.url, "Registered show manager");
    }

    let event_bus = Arc::new(EventBus::new());
    let progress = Arc::new(ProgressReporter::new());
    let lock = task_queue::execution_lock();

    let reconciler = Arc::new(Reconciler::new(
        db.clone(),
        media_server.clone(),
        event_bus.clone(),
        config.reconciliation.clone(),
    ));
    let actions = ActionHandler::new(
        media_server.clone(),
        IdentifierResolver::new(media_server.clone(), catalog),
        companions,
    );
    let handler = CollectionHandler::new(db.clone(), actions, reconciler.clone(), event_bus.clone());
    let evaluator = RuleEvaluator::new(
        media_server.clone(),
        engine,
        progress.clone(),
        config.rules.page_size,
    );
    let executor = Arc::new(RuleExecutor::new(
        db.clone(),
        evaluator,
        reconciler.clone(),
        handler,
        progress.clone(),
        event_bus.clone(),
    ));

    let queue = TaskQueue::new(executor, lock.clone(), event_bus.clone(), progress);
    let collections = Arc::new(CollectionService::new(
        db.clone(),
        media_server,
        reconciler,
        lock,
        event_bus.clone(),
    ));

    let scheduler = Scheduler::new(
        &config.rules,
        queue.clone(),
        Arc::new(db::RuleGroupRepository::new(db.clone())),
        collections,
    )?;
    scheduler.start().await?;

    event_bus
        .publish(Event::system(
            EventType::SystemStarted,
            serde_json::json!({ "version": mediasweep::VERSION }),
        ))
        .await;
    info!("mediasweep started");

    shutdown_signal().await;

    scheduler.stop().await;
    let timeout = Duration::from_secs(config.rules.shutdown_timeout);
    if tokio::time::timeout(timeout, queue.stop()).await.is_err() {
        warn!(timeout_secs = config.rules.shutdown_timeout, "Running rule group did not stop in time");
    }
    event_bus
        .publish(Event::system(EventType::SystemShutdown, serde_json::json!({})))
        .await;

    info!("mediasweep stopped");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }

    info!("Initiating graceful shutdown...");
}
