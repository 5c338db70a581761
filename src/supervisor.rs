//! Supervisor: process-level orchestration. Boots the connection pool,
//! starts the heartbeat checker, spawns the browser/validation worker
//! fleet, seeds the task queues from existing articuli, monitors child
//! tasks, and drives graceful shutdown.
//!
//! Each worker is realized as a supervised `tokio::task` rather than an OS
//! subprocess; restart-on-panic via `JoinHandle` inspection plays the role
//! exit-code monitoring would for a subprocess-based fleet. A real deployment
//! wanting true process isolation per worker would split this into a thin
//! per-worker binary; that split is outside this core's scope.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::collaborators::catalog_parser::{CatalogOutcomeStatus, StubCatalogParser};
use crate::collaborators::detector::{DetectorState, StubPageDetector};
use crate::collaborators::card_parser::StubCardParser;
use crate::config::{Settings, WorkerKind};
use crate::models::ArticulumState;
use crate::repository::catalog_queue::CatalogQueue;
use crate::repository::object_queue::ObjectQueue;
use crate::repository::proxy_pool::ProxyPool;
use crate::repository::{self, PgPool};
use crate::validation::ai::build_ai_validator;
use crate::worker::browser_worker::{BrowserWorkerConfig, BrowserWorkerRuntime};
use crate::worker::heartbeat;
use crate::worker::validation_worker::{
    RunOutcome, ValidationWorkerConfig, ValidationWorkerRuntime, AI_OUTAGE_EXIT_CODE,
};
use crate::worker::new_worker_id;

/// Run the full fleet until `SIGTERM`/`SIGINT`/`Ctrl-C`. Returns once every
/// child task has been asked to stop and has either exited or been given up
/// on after the shutdown grace period.
pub async fn run(settings: Settings, pool: PgPool) -> anyhow::Result<()> {
    let catalog_queue = CatalogQueue::new(pool.clone());
    let object_queue = ObjectQueue::new(pool.clone(), settings.object_task_concurrency_cap);
    let proxy_pool = ProxyPool::new(pool.clone());

    seed_queues(&pool, &catalog_queue, &object_queue, &settings).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let heartbeat_handle = tokio::spawn(heartbeat::run_loop(
        catalog_queue.clone(),
        object_queue.clone(),
        proxy_pool.clone(),
        Duration::from_secs(settings.heartbeat_timeout_seconds),
        Duration::from_secs(settings.heartbeat_check_interval_seconds),
        shutdown_rx.clone(),
    ));

    let mut browser_handles: Vec<JoinHandle<()>> = Vec::new();
    for _ in 0..settings.browser_workers {
        browser_handles.push(spawn_browser_worker(&settings, &pool, &catalog_queue, &object_queue, &proxy_pool, shutdown_rx.clone()));
    }

    let mut validation_handles: Vec<JoinHandle<RunOutcome>> = Vec::new();
    for _ in 0..settings.validation_workers {
        validation_handles.push(spawn_validation_worker(&settings, &pool, &object_queue, shutdown_rx.clone()));
    }

    let browser_monitor = tokio::spawn(monitor_and_restart_browser_workers(
        settings.clone(),
        pool.clone(),
        catalog_queue.clone(),
        object_queue.clone(),
        proxy_pool.clone(),
        browser_handles,
        shutdown_rx.clone(),
    ));
    let validation_monitor = tokio::spawn(monitor_and_restart_validation_workers(
        settings.clone(),
        pool.clone(),
        object_queue.clone(),
        validation_handles,
        shutdown_rx.clone(),
    ));

    wait_for_shutdown_signal().await;
    tracing::info!("shutdown signal received, stopping fleet");
    let _ = shutdown_tx.send(true);

    if browser_monitor.await.is_err() {
        tracing::error!("browser worker monitor task panicked");
    }
    if validation_monitor.await.is_err() {
        tracing::error!("validation worker monitor task panicked");
    }

    heartbeat_handle.abort();

    Ok(())
}

/// Run a single worker of `kind` until `SIGTERM`/`SIGINT`/`Ctrl-C`, for a
/// deployment that wants one worker per host/process (the `worker`
/// subcommand) instead of the in-process fleet `run` drives. No heartbeat
/// checker runs here; that stays the job of whichever node runs `supervisor`
/// or `migrate` against the same database.
pub async fn run_single_worker(kind: WorkerKind, settings: Settings, pool: PgPool) -> anyhow::Result<()> {
    let catalog_queue = CatalogQueue::new(pool.clone());
    let object_queue = ObjectQueue::new(pool.clone(), settings.object_task_concurrency_cap);
    let proxy_pool = ProxyPool::new(pool.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let signal_task = tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    match kind {
        WorkerKind::Browser => {
            spawn_browser_worker(&settings, &pool, &catalog_queue, &object_queue, &proxy_pool, shutdown_rx).await?;
        }
        WorkerKind::Validation => {
            match spawn_validation_worker(&settings, &pool, &object_queue, shutdown_rx).await? {
                RunOutcome::AiOutage => {
                    tracing::error!("validation worker exited due to sustained AI provider outage");
                    signal_task.abort();
                    std::process::exit(AI_OUTAGE_EXIT_CODE);
                }
                RunOutcome::ShutdownRequested => {}
            }
        }
    }

    signal_task.abort();
    Ok(())
}

/// Poll `handles` every `supervisor_poll_interval_seconds` and restart any
/// that have exited (panicked, or returned early) while the fleet is still
/// running. Once `shutdown` fires, stops restarting and instead joins every
/// handle, bounded by `shutdown_grace_seconds`.
async fn monitor_and_restart_browser_workers(
    settings: Settings,
    pool: PgPool,
    catalog_queue: CatalogQueue,
    object_queue: ObjectQueue,
    proxy_pool: ProxyPool,
    mut handles: Vec<JoinHandle<()>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(settings.supervisor_poll_interval_seconds));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for handle in handles.iter_mut() {
                    if handle.is_finished() {
                        tracing::warn!("browser worker exited unexpectedly, restarting");
                        *handle = spawn_browser_worker(&settings, &pool, &catalog_queue, &object_queue, &proxy_pool, shutdown.clone());
                    }
                }
            }
            _ = shutdown.changed() => break,
        }
    }

    let grace = Duration::from_secs(settings.shutdown_grace_seconds);
    for handle in handles {
        if tokio::time::timeout(grace, handle).await.is_err() {
            tracing::warn!("browser worker did not exit within the shutdown grace period");
        }
    }
}

/// Validation-worker counterpart to [`monitor_and_restart_browser_workers`].
/// A worker that exits early before shutdown was requested is restarted
/// whether it panicked or returned [`RunOutcome::AiOutage`] — the latter is
/// exactly the case the distinguished exit code exists to signal.
async fn monitor_and_restart_validation_workers(
    settings: Settings,
    pool: PgPool,
    object_queue: ObjectQueue,
    mut handles: Vec<JoinHandle<RunOutcome>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(settings.supervisor_poll_interval_seconds));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for handle in handles.iter_mut() {
                    if handle.is_finished() {
                        tracing::warn!("validation worker exited unexpectedly, restarting");
                        *handle = spawn_validation_worker(&settings, &pool, &object_queue, shutdown.clone());
                    }
                }
            }
            _ = shutdown.changed() => break,
        }
    }

    let grace = Duration::from_secs(settings.shutdown_grace_seconds);
    for handle in handles {
        match tokio::time::timeout(grace, handle).await {
            Ok(Ok(RunOutcome::AiOutage)) => {
                tracing::error!("validation worker exited due to sustained AI provider outage");
            }
            Ok(Ok(RunOutcome::ShutdownRequested)) => {}
            Ok(Err(err)) => tracing::error!(%err, "validation worker task panicked"),
            Err(_) => tracing::warn!("validation worker did not exit within the shutdown grace period"),
        }
    }
}

fn spawn_browser_worker(
    settings: &Settings,
    pool: &PgPool,
    catalog_queue: &CatalogQueue,
    object_queue: &ObjectQueue,
    proxy_pool: &ProxyPool,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let worker_id = new_worker_id("browser");
    let config = BrowserWorkerConfig::from_settings(settings, worker_id);
    let pool = pool.clone();
    let catalog_queue = catalog_queue.clone();
    let object_queue = object_queue.clone();
    let proxy_pool = proxy_pool.clone();

    tokio::spawn(async move {
        // Real browser-driven collaborators (HTML extraction, DOM
        // detection, captcha solving) are out of scope; wire stand-ins
        // that a deployment wanting live scraping replaces at this seam.
        let catalog_parser = Box::new(StubCatalogParser::always(CatalogOutcomeStatus::Empty, Vec::new()));
        let card_parser = Box::new(StubCardParser::err(crate::collaborators::card_parser::CardParseError::NotACard));
        let detector = Box::new(StubPageDetector::new(DetectorState::NotDetected));

        let mut runtime = BrowserWorkerRuntime::new(
            config, pool, catalog_queue, object_queue, proxy_pool, catalog_parser, card_parser, detector,
        );
        runtime.run(shutdown).await;
    })
}

fn spawn_validation_worker(
    settings: &Settings,
    pool: &PgPool,
    object_queue: &ObjectQueue,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<RunOutcome> {
    let worker_id = new_worker_id("validation");
    let config = ValidationWorkerConfig::from_settings(settings, worker_id);
    let settings_clone = settings.clone();
    let pool = pool.clone();
    let object_queue = object_queue.clone();
    let ai_validator = build_ai_validator(settings);

    tokio::spawn(async move {
        let mut runtime = ValidationWorkerRuntime::new(config, settings_clone, pool, object_queue, ai_validator);
        runtime.run(shutdown).await
    })
}

/// Materialize catalog tasks for every `NEW` articulum and object tasks for
/// every pre-existing `VALIDATED` one. This does not itself trigger
/// `VALIDATED -> OBJECT_PARSING` — that remains the first object task
/// claim's responsibility (see DESIGN.md's Open Questions).
async fn seed_queues(
    pool: &PgPool,
    catalog_queue: &CatalogQueue,
    object_queue: &ObjectQueue,
    settings: &Settings,
) -> anyhow::Result<()> {
    let new_articuli = repository::articulums_in_state(pool, ArticulumState::New).await?;
    for articulum in new_articuli {
        catalog_queue.enqueue(articulum.id).await?;
    }

    if !settings.skip_object_parsing {
        let validated = repository::articulums_in_state(pool, ArticulumState::Validated).await?;
        for articulum in validated {
            object_queue.create_tasks_for_articulum(articulum.id).await?;
        }
    }

    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to register SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
