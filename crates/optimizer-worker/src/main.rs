//! Rate Plan Worker - bounded-time optimization worker
//!
//! Runs unit workers and the completion watcher against the configured
//! collaborators, and serves health, metrics and instance status over HTTP.

use anyhow::{Context, Result};
use optimizer_lib::{
    continuation::ContinuationManager,
    cost::CostModel,
    dispatch::{DispatchOutcome, InstanceDispatcher},
    health::{components, HealthRegistry},
    observability::{LifecycleLogger, OptimizerMetrics},
    ports::{
        CheckpointCache, Collaborators, FileCheckpointCache, MemoryCheckpointCache, MemoryInstanceStore,
        MemoryWorkQueue, TracingNotificationSink,
    },
    runtime::{WatcherLoop, WorkerLoop},
    watcher::CompletionWatcher,
};
use optimizer_worker::{api, config::WorkerConfig, request};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const WORKER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting rate-plan-worker");

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = WorkerConfig::load(config_path.as_deref())?;
    info!(
        worker_name = %config.worker_name,
        workers = config.workers,
        budget = ?config.budget(),
        cache_dir = ?config.cache_dir,
        "Worker configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::ENGINE).await;
    health_registry.register(components::WORK_QUEUE).await;
    health_registry.register(components::CHECKPOINT_CACHE).await;
    health_registry.register(components::WATCHER).await;

    let metrics = OptimizerMetrics::new();
    let logger = LifecycleLogger::new(&config.worker_name);
    logger.log_startup(WORKER_VERSION, config.workers);

    let collaborators = build_collaborators(&config, &health_registry).await?;
    let cost_model = Arc::new(CostModel::new());

    let manager = Arc::new(ContinuationManager::new(
        collaborators.clone(),
        cost_model.clone(),
        config.continuation(),
        logger.clone(),
    ));
    let watcher = Arc::new(CompletionWatcher::new(
        collaborators.clone(),
        cost_model,
        config.watcher(),
        logger.clone(),
    ));

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut handles = Vec::with_capacity(config.workers + 1);
    for id in 0..config.workers {
        let worker = WorkerLoop::new(
            id,
            collaborators.work_queue.clone(),
            manager.clone(),
            config.loop_config(),
        )
        .with_health(health_registry.clone());
        handles.push(tokio::spawn(worker.run(shutdown_tx.subscribe())));
    }
    let watcher_loop = WatcherLoop::new(
        collaborators.control_queue.clone(),
        watcher,
        config.loop_config(),
    )
    .with_health(health_registry.clone());
    handles.push(tokio::spawn(watcher_loop.run(shutdown_tx.subscribe())));

    if let Some(path) = &config.request_file {
        let dispatcher = InstanceDispatcher::new(collaborators.clone(), config.dispatch(), logger.clone());
        dispatch_request_file(&dispatcher, path, &config).await;
    }

    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        metrics,
        collaborators.store.clone(),
    ));
    health_registry.set_ready(true).await;

    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for shutdown signal")?;
            logger.log_shutdown("SIGINT received");
        }
        served = api_handle => {
            match served {
                Ok(Ok(())) => logger.log_shutdown("API server stopped"),
                Ok(Err(e)) => error!(error = %e, "API server failed"),
                Err(e) => error!(error = %e, "API server task panicked"),
            }
        }
    }

    health_registry.set_ready(false).await;
    // No receivers left only if every loop already exited
    let _ = shutdown_tx.send(());
    for handle in handles {
        if let Err(e) = handle.await {
            warn!(error = %e, "Loop task ended abnormally");
        }
    }
    info!("Shutdown complete");

    Ok(())
}

async fn build_collaborators(config: &WorkerConfig, health: &HealthRegistry) -> Result<Collaborators> {
    let cache: Arc<dyn CheckpointCache> = match &config.cache_dir {
        Some(dir) => {
            let cache = FileCheckpointCache::open(dir)
                .await
                .with_context(|| format!("failed to open checkpoint cache at {}", dir.display()))?;
            match cache.purge_expired().await {
                Ok(removed) => info!(removed, dir = %dir.display(), "Purged expired checkpoints"),
                Err(e) => {
                    warn!(error = %e, "Checkpoint purge failed");
                    health
                        .set_degraded(components::CHECKPOINT_CACHE, e.to_string())
                        .await;
                }
            }
            Arc::new(cache)
        }
        None => Arc::new(MemoryCheckpointCache::new()),
    };

    let visibility = config.visibility_timeout();
    Ok(Collaborators {
        work_queue: Arc::new(MemoryWorkQueue::with_visibility_timeout(visibility)),
        control_queue: Arc::new(MemoryWorkQueue::with_visibility_timeout(visibility)),
        cache,
        store: Arc::new(MemoryInstanceStore::new()),
        sink: Arc::new(TracingNotificationSink),
    })
}

async fn dispatch_request_file(dispatcher: &InstanceDispatcher, path: &Path, config: &WorkerConfig) {
    let request = match request::load_request(path, &config.settings).await {
        Ok(request) => request,
        Err(e) => {
            error!(path = %path.display(), error = %e, "Request file rejected");
            return;
        }
    };
    let instance_id = request.instance_id.clone();
    match dispatcher.dispatch(request).await {
        Ok(DispatchOutcome::Dispatched { units, sequences }) => {
            info!(instance_id = %instance_id, units, sequences, "Request file dispatched")
        }
        Ok(DispatchOutcome::AlreadyDispatched) => {
            info!(instance_id = %instance_id, "Request file instance already dispatched")
        }
        Ok(DispatchOutcome::Aborted(outcome)) => {
            warn!(instance_id = %instance_id, reason = %outcome.reason, "Request file instance aborted")
        }
        Err(e) => error!(instance_id = %instance_id, error = %e, "Request file dispatch failed"),
    }
}
