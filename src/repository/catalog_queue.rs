//! Catalog Task Queue: per-articulum catalog-scrape jobs with checkpointing.
//!
//! `enqueue` and `acquire` are deliberately split rather than combined:
//! enqueueing never mutates articulum state, so a crashed supervisor cannot
//! orphan an articulum mid-creation.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::RunQueryDsl;
use thiserror::Error;

use crate::models::{ArticulumState, CatalogTask, CatalogTaskStatus, NewCatalogTask};
use crate::schema::articulums::dsl as articulums_dsl;
use crate::schema::catalog_tasks::dsl as t;

use super::pool::PgPool;
use super::state_machine;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error(transparent)]
    StateMachine(#[from] state_machine::StateMachineError),

    #[error("catalog task {0} is not in a state that can be completed")]
    CompleteConflict(i32),
}

pub type Result<T> = std::result::Result<T, QueueError>;

#[derive(Clone)]
pub struct CatalogQueue {
    pool: PgPool,
}

impl CatalogQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a `pending` task at `checkpoint_page = 1`. Does not touch
    /// articulum state.
    pub async fn enqueue(&self, articulum_id: i32) -> Result<CatalogTask> {
        let mut conn = self.pool.get().await?;
        Ok(diesel::insert_into(t::catalog_tasks)
            .values(NewCatalogTask { articulum_id })
            .get_result(&mut conn)
            .await?)
    }

    /// Claim the oldest pending task whose articulum is still `NEW`, skipping
    /// rows already locked by a concurrent acquirer. Transitions the
    /// articulum `NEW -> CATALOG_PARSING` as part of the same transaction; if
    /// that transition loses a race, the whole attempt rolls back and `None`
    /// is returned — a benign outcome, not an error.
    pub async fn acquire(&self, worker_id: &str) -> Result<Option<CatalogTask>> {
        let mut conn = self.pool.get().await?;
        let worker_id = worker_id.to_string();

        conn.transaction(|conn| {
            async move {
                let candidate: Option<CatalogTask> = t::catalog_tasks
                    .inner_join(
                        articulums_dsl::articulums.on(t::articulum_id.eq(articulums_dsl::id)),
                    )
                    .filter(t::status.eq(CatalogTaskStatus::Pending.as_str()))
                    .filter(articulums_dsl::state.eq(ArticulumState::New.as_str()))
                    .order(t::created_at.asc())
                    .select(CatalogTask::as_select())
                    .for_update()
                    .skip_locked()
                    .first(conn)
                    .await
                    .optional()?;

                let Some(task) = candidate else {
                    return Ok(None);
                };

                if !state_machine::to_catalog_parsing(conn, task.articulum_id).await? {
                    return Ok(None);
                }

                let now = Utc::now();
                let task = diesel::update(t::catalog_tasks.filter(t::id.eq(task.id)))
                    .set((
                        t::status.eq(CatalogTaskStatus::Processing.as_str()),
                        t::worker_id.eq(&worker_id),
                        t::heartbeat_at.eq(now),
                        t::updated_at.eq(now),
                    ))
                    .get_result(conn)
                    .await?;

                Ok(Some(task))
            }
            .scope_boxed()
        })
        .await
    }

    /// Complete `task_id` and transition its articulum `CATALOG_PARSING ->
    /// CATALOG_PARSED` in one transaction. Raises if the transition loses its
    /// precondition, so the caller's enclosing insert of listing rows rolls
    /// back too.
    pub async fn complete(&self, task_id: i32, articulum_id: i32) -> Result<()> {
        let mut conn = self.pool.get().await?;

        conn.transaction(|conn| {
            async move {
                if !state_machine::to_catalog_parsed(conn, articulum_id).await? {
                    return Err(QueueError::CompleteConflict(task_id));
                }

                diesel::update(t::catalog_tasks.filter(t::id.eq(task_id)))
                    .set((
                        t::status.eq(CatalogTaskStatus::Completed.as_str()),
                        t::updated_at.eq(Utc::now()),
                    ))
                    .execute(conn)
                    .await?;

                Ok(())
            }
            .scope_boxed()
        })
        .await
    }

    pub async fn fail(&self, task_id: i32) -> Result<()> {
        self.set_terminal(task_id, CatalogTaskStatus::Failed).await
    }

    pub async fn invalidate(&self, task_id: i32) -> Result<()> {
        self.set_terminal(task_id, CatalogTaskStatus::Invalid).await
    }

    async fn set_terminal(&self, task_id: i32, status: CatalogTaskStatus) -> Result<()> {
        let mut conn = self.pool.get().await?;
        diesel::update(t::catalog_tasks.filter(t::id.eq(task_id)))
            .set((t::status.eq(status.as_str()), t::updated_at.eq(Utc::now())))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    /// Return the task to `pending` and clear its worker. Leaves the
    /// articulum state untouched — it remains `CATALOG_PARSING` until the
    /// heartbeat checker (or the original worker) resolves it. See
    /// DESIGN.md's note on the open question this preserves.
    pub async fn return_to_queue(&self, task_id: i32) -> Result<()> {
        let mut conn = self.pool.get().await?;
        diesel::update(t::catalog_tasks.filter(t::id.eq(task_id)))
            .set((
                t::status.eq(CatalogTaskStatus::Pending.as_str()),
                t::worker_id.eq(None::<String>),
                t::updated_at.eq(Utc::now()),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    pub async fn update_checkpoint(&self, task_id: i32, page: i32) -> Result<()> {
        let mut conn = self.pool.get().await?;
        diesel::update(t::catalog_tasks.filter(t::id.eq(task_id)))
            .set((t::checkpoint_page.eq(page), t::updated_at.eq(Utc::now())))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    pub async fn update_heartbeat(&self, task_id: i32) -> Result<()> {
        let mut conn = self.pool.get().await?;
        diesel::update(t::catalog_tasks.filter(t::id.eq(task_id)))
            .set(t::heartbeat_at.eq(Utc::now()))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    /// Bump the diagnostic wrong-page-count counter and return its new
    /// value. Cumulative, never reset; purely operational.
    pub async fn increment_wrong_page_count(&self, task_id: i32) -> Result<i32> {
        let mut conn = self.pool.get().await?;
        let task: CatalogTask = diesel::update(t::catalog_tasks.filter(t::id.eq(task_id)))
            .set((
                t::wrong_page_count.eq(t::wrong_page_count + 1),
                t::updated_at.eq(Utc::now()),
            ))
            .get_result(&mut conn)
            .await?;
        Ok(task.wrong_page_count)
    }

    /// Processing tasks whose heartbeat has gone silent for longer than
    /// `timeout`. Used by the heartbeat checker; does not itself mutate
    /// anything.
    pub async fn stale_processing(&self, timeout: std::time::Duration) -> Result<Vec<CatalogTask>> {
        let mut conn = self.pool.get().await?;
        let cutoff: DateTime<Utc> = Utc::now() - ChronoDuration::from_std(timeout).unwrap_or(ChronoDuration::zero());
        Ok(t::catalog_tasks
            .filter(t::status.eq(CatalogTaskStatus::Processing.as_str()))
            .filter(t::heartbeat_at.lt(cutoff))
            .select(CatalogTask::as_select())
            .load(&mut conn)
            .await?)
    }
}
