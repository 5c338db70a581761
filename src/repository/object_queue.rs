//! Object Task Queue: per-listing detail-scrape jobs, gated by a fleet-wide
//! concurrency cap enforced through a Postgres advisory lock.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use diesel::prelude::*;
use diesel::sql_query;
use diesel::sql_types::{BigInt, Integer, Text};
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::RunQueryDsl;
use thiserror::Error;

use crate::models::{NewObjectTask, ObjectTask, ObjectTaskStatus};
use crate::schema::object_tasks::dsl as t;
use crate::schema::validation_results::dsl as v;

use super::pool::PgPool;

/// The advisory-lock key guarding the object-task global cap check. A fixed
/// constant scoped to this queue only; the catalog queue needs no equivalent
/// lock since its cap is per-articulum, not fleet-wide.
pub const OBJECT_TASK_CAP_LOCK_KEY: i64 = 2;

/// Validation stages every object task's listing must have passed. `ai` is
/// added dynamically iff the articulum has any `ai` validation rows at all.
const REQUIRED_STAGES: [&str; 2] = ["price_filter", "mechanical"];

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("object task {0} is not in a state that can be completed")]
    CompleteConflict(i32),
}

pub type Result<T> = std::result::Result<T, QueueError>;

#[derive(Clone)]
pub struct ObjectQueue {
    pool: PgPool,
    /// Fleet-wide cap on concurrently `processing` object tasks.
    global_cap: i64,
}

#[derive(QueryableByName)]
struct CountRow {
    #[diesel(sql_type = BigInt)]
    count: i64,
}

impl ObjectQueue {
    pub fn new(pool: PgPool, global_cap: i64) -> Self {
        Self { pool, global_cap }
    }

    /// Materialize object tasks for every listing of `articulum_id` that has
    /// a `passed=true` row for each required stage. `ai` joins the required
    /// set iff the articulum has at least one `ai` validation row.
    pub async fn create_tasks_for_articulum(&self, articulum_id: i32) -> Result<usize> {
        let mut conn = self.pool.get().await?;
        create_tasks_for_articulum_conn(&mut conn, articulum_id).await
    }

    /// Claim the oldest pending object task, refusing if the fleet is already
    /// at its global concurrency cap. The advisory lock is held only for the
    /// duration of the count-then-claim sequence, not the task's lifetime.
    pub async fn acquire(&self, worker_id: &str) -> Result<Option<ObjectTask>> {
        let mut conn = self.pool.get().await?;
        let worker_id = worker_id.to_string();
        let cap = self.global_cap;

        conn.transaction(|conn| {
            async move {
                sql_query("SELECT pg_advisory_xact_lock($1)")
                    .bind::<BigInt, _>(OBJECT_TASK_CAP_LOCK_KEY)
                    .execute(conn)
                    .await?;

                let in_flight: i64 = t::object_tasks
                    .filter(t::status.eq(ObjectTaskStatus::Processing.as_str()))
                    .count()
                    .get_result(conn)
                    .await?;

                if in_flight >= cap {
                    return Ok(None);
                }

                let candidate: Option<ObjectTask> = t::object_tasks
                    .filter(t::status.eq(ObjectTaskStatus::Pending.as_str()))
                    .order(t::created_at.asc())
                    .select(ObjectTask::as_select())
                    .for_update()
                    .skip_locked()
                    .first(conn)
                    .await
                    .optional()?;

                let Some(task) = candidate else {
                    return Ok(None);
                };

                let now = Utc::now();
                let task = diesel::update(t::object_tasks.filter(t::id.eq(task.id)))
                    .set((
                        t::status.eq(ObjectTaskStatus::Processing.as_str()),
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

    pub async fn complete(&self, task_id: i32) -> Result<()> {
        self.set_terminal(task_id, ObjectTaskStatus::Completed)
            .await
    }

    pub async fn fail(&self, task_id: i32) -> Result<()> {
        self.set_terminal(task_id, ObjectTaskStatus::Failed).await
    }

    /// Invalidate is a first-class outcome used when the marketplace has
    /// removed the listing.
    pub async fn invalidate(&self, task_id: i32) -> Result<()> {
        self.set_terminal(task_id, ObjectTaskStatus::Invalid).await
    }

    async fn set_terminal(&self, task_id: i32, status: ObjectTaskStatus) -> Result<()> {
        let mut conn = self.pool.get().await?;
        diesel::update(t::object_tasks.filter(t::id.eq(task_id)))
            .set((t::status.eq(status.as_str()), t::updated_at.eq(Utc::now())))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    pub async fn return_to_queue(&self, task_id: i32) -> Result<()> {
        let mut conn = self.pool.get().await?;
        diesel::update(t::object_tasks.filter(t::id.eq(task_id)))
            .set((
                t::status.eq(ObjectTaskStatus::Pending.as_str()),
                t::worker_id.eq(None::<String>),
                t::updated_at.eq(Utc::now()),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    pub async fn update_heartbeat(&self, task_id: i32) -> Result<()> {
        let mut conn = self.pool.get().await?;
        diesel::update(t::object_tasks.filter(t::id.eq(task_id)))
            .set(t::heartbeat_at.eq(Utc::now()))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    /// Processing tasks whose heartbeat has gone silent for longer than
    /// `timeout`. Used by the heartbeat checker; does not itself mutate
    /// anything.
    pub async fn stale_processing(&self, timeout: std::time::Duration) -> Result<Vec<ObjectTask>> {
        let mut conn = self.pool.get().await?;
        let cutoff: DateTime<Utc> = Utc::now() - ChronoDuration::from_std(timeout).unwrap_or(ChronoDuration::zero());
        Ok(t::object_tasks
            .filter(t::status.eq(ObjectTaskStatus::Processing.as_str()))
            .filter(t::heartbeat_at.lt(cutoff))
            .select(ObjectTask::as_select())
            .load(&mut conn)
            .await?)
    }
}

/// Same as [`ObjectQueue::create_tasks_for_articulum`], but runs against a
/// caller-supplied connection instead of a fresh pool checkout, so it can be
/// folded into a transaction alongside another write (the validation
/// pipeline's `VALIDATING -> VALIDATED` transition, in particular).
pub async fn create_tasks_for_articulum_conn<C>(conn: &mut C, articulum_id: i32) -> Result<usize>
where
    C: diesel_async::AsyncConnection<Backend = diesel::pg::Pg>,
{
    let has_ai_stage: bool = diesel::select(diesel::dsl::exists(
        v::validation_results
            .filter(v::articulum_id.eq(articulum_id))
            .filter(v::validation_type.eq("ai")),
    ))
    .get_result(conn)
    .await?;

    let mut required_stages: Vec<&str> = REQUIRED_STAGES.to_vec();
    if has_ai_stage {
        required_stages.push("ai");
    }

    let mut created = 0usize;

    // Listings passing every required stage: group by listing, count
    // distinct passed stages, keep those matching the required count.
    let passing: Vec<String> = v::validation_results
        .filter(v::articulum_id.eq(articulum_id))
        .filter(v::passed.eq(true))
        .filter(v::validation_type.eq_any(required_stages.clone()))
        .select(v::avito_item_id)
        .distinct()
        .load::<String>(conn)
        .await?
        .into_iter()
        .collect();

    // A listing qualifies only if it has a passing row for *every*
    // required stage, not merely at least one.
    for avito_item_id in passing {
        let passed_stage_count: i64 = v::validation_results
            .filter(v::articulum_id.eq(articulum_id))
            .filter(v::avito_item_id.eq(&avito_item_id))
            .filter(v::passed.eq(true))
            .filter(v::validation_type.eq_any(required_stages.clone()))
            .count()
            .get_result(conn)
            .await?;

        if passed_stage_count < required_stages.len() as i64 {
            continue;
        }

        let inserted = diesel::insert_into(t::object_tasks)
            .values(NewObjectTask {
                articulum_id,
                avito_item_id: &avito_item_id,
            })
            .on_conflict((t::articulum_id, t::avito_item_id))
            .do_nothing()
            .execute(conn)
            .await?;
        created += inserted;
    }

    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advisory_lock_key_is_distinct_and_stable() {
        assert_eq!(OBJECT_TASK_CAP_LOCK_KEY, 2);
    }

    #[test]
    fn required_stages_are_price_filter_and_mechanical() {
        assert_eq!(REQUIRED_STAGES, ["price_filter", "mechanical"]);
    }
}
