//! The heartbeat checker: reaps catalog and object tasks abandoned by a
//! worker that died without running its cleanup path.
//!
//! Both queues get the same sweep, since the same dangling-lease failure
//! mode applies equally whether the abandoned task was a catalog page scrape
//! or a listing detail scrape.

use std::time::Duration;

use crate::repository::catalog_queue::CatalogQueue;
use crate::repository::object_queue::ObjectQueue;
use crate::repository::proxy_pool::ProxyPool;

/// Run one sweep: find every `processing` catalog/object task whose
/// heartbeat is older than `timeout`, release the proxy its worker held
/// (unless already blocked), then return the task to `pending` with its
/// `worker_id` cleared. Proxy release happens first so a new acquirer never
/// observes a task freed while its old proxy is still marked in use.
pub async fn run_sweep(
    catalog_queue: &CatalogQueue,
    object_queue: &ObjectQueue,
    proxy_pool: &ProxyPool,
    timeout: Duration,
) -> anyhow::Result<(usize, usize)> {
    let stale_catalog = catalog_queue.stale_processing(timeout).await?;
    for task in &stale_catalog {
        if let Some(worker_id) = &task.worker_id {
            proxy_pool.release_by_worker(worker_id).await?;
            tracing::warn!(task_id = task.id, worker_id, "reaping stale catalog task");
        }
        catalog_queue.return_to_queue(task.id).await?;
    }

    let stale_object = object_queue.stale_processing(timeout).await?;
    for task in &stale_object {
        if let Some(worker_id) = &task.worker_id {
            proxy_pool.release_by_worker(worker_id).await?;
            tracing::warn!(task_id = task.id, worker_id, "reaping stale object task");
        }
        object_queue.return_to_queue(task.id).await?;
    }

    Ok((stale_catalog.len(), stale_object.len()))
}

/// Run `run_sweep` on a fixed interval until `shutdown` fires.
pub async fn run_loop(
    catalog_queue: CatalogQueue,
    object_queue: ObjectQueue,
    proxy_pool: ProxyPool,
    timeout: Duration,
    check_interval: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(check_interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match run_sweep(&catalog_queue, &object_queue, &proxy_pool, timeout).await {
                    Ok((c, o)) if c > 0 || o > 0 => {
                        tracing::info!(reaped_catalog = c, reaped_object = o, "heartbeat sweep reaped tasks");
                    }
                    Ok(_) => {}
                    Err(err) => tracing::error!(%err, "heartbeat sweep failed"),
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    tracing::info!("heartbeat checker shutting down");
                    return;
                }
            }
        }
    }
}
