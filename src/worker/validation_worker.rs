//! Validation Worker Runtime: claims `CATALOG_PARSED` articuli, runs the
//! three-stage pipeline, and advances or rolls back the articulum state.

use std::time::Duration;

use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::AsyncConnection;
use tokio::sync::watch;

use crate::config::Settings;
use crate::models::ArticulumState;
use crate::repository::object_queue::{self, ObjectQueue};
use crate::repository::state_machine;
use crate::repository::{self, PgPool};
use crate::validation::ai::AiValidator;
use crate::validation::{self, PipelineOutcome};

/// Distinguished exit code used when the AI collaborator has failed three
/// times in a row.
pub const AI_OUTAGE_EXIT_CODE: i32 = 2;

pub struct ValidationWorkerConfig {
    pub worker_id: String,
    pub idle_sleep: Duration,
    pub ai_max_consecutive_errors: u32,
    pub skip_object_parsing: bool,
}

impl ValidationWorkerConfig {
    pub fn from_settings(settings: &Settings, worker_id: String) -> Self {
        Self {
            worker_id,
            idle_sleep: Duration::from_secs(settings.worker_idle_sleep_seconds),
            ai_max_consecutive_errors: settings.ai_max_consecutive_errors,
            skip_object_parsing: settings.skip_object_parsing,
        }
    }
}

pub struct ValidationWorkerRuntime {
    config: ValidationWorkerConfig,
    settings: Settings,
    pool: PgPool,
    object_queue: ObjectQueue,
    ai_validator: Option<Box<dyn AiValidator>>,
    ai_consecutive_errors: u32,
}

/// Outcome of the worker's run loop: either it ran until told to shut down,
/// or the AI collaborator failed enough times in a row that it gave up,
/// in which case the caller should exit the process with
/// [`AI_OUTAGE_EXIT_CODE`].
pub enum RunOutcome {
    ShutdownRequested,
    AiOutage,
}

impl ValidationWorkerRuntime {
    pub fn new(
        config: ValidationWorkerConfig,
        settings: Settings,
        pool: PgPool,
        object_queue: ObjectQueue,
        ai_validator: Option<Box<dyn AiValidator>>,
    ) -> Self {
        Self {
            config,
            settings,
            pool,
            object_queue,
            ai_validator,
            ai_consecutive_errors: 0,
        }
    }

    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> RunOutcome {
        loop {
            if *shutdown.borrow() {
                return RunOutcome::ShutdownRequested;
            }

            let claimed = self.claim_next().await;

            match claimed {
                Some((articulum_id, articulum_code)) => {
                    match self.validate_one(articulum_id, &articulum_code).await {
                        Ok(()) => {}
                        Err(err) => {
                            tracing::error!(%err, articulum_id, "validation run failed");
                            if self.ai_consecutive_errors >= self.config.ai_max_consecutive_errors {
                                return RunOutcome::AiOutage;
                            }
                        }
                    }
                }
                None => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.idle_sleep) => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }
        }
    }

    /// Claim the oldest `CATALOG_PARSED` articulum via the state machine's
    /// conditional transition and return its id/code. `None` means no work
    /// is available right now.
    async fn claim_next(&self) -> Option<(i32, String)> {
        let candidates = repository::articulums_in_state(&self.pool, ArticulumState::CatalogParsed)
            .await
            .ok()?;

        for candidate in candidates {
            let mut conn = self.pool.get().await.ok()?;
            let claimed = state_machine::to_validating(&mut conn, candidate.id).await.ok()?;
            if claimed {
                return Some((candidate.id, candidate.articulum));
            }
        }
        None
    }

    async fn validate_one(&mut self, articulum_id: i32, articulum_code: &str) -> anyhow::Result<()> {
        let result = validation::run_pipeline(
            &self.pool,
            &self.settings,
            self.ai_validator.as_deref(),
            articulum_id,
            articulum_code,
        )
        .await;

        let outcome = match result {
            Ok(outcome) => {
                self.ai_consecutive_errors = 0;
                outcome
            }
            Err(err) => {
                if is_ai_transport_error(&err) {
                    self.ai_consecutive_errors += 1;
                    tracing::warn!(
                        articulum_id,
                        consecutive_errors = self.ai_consecutive_errors,
                        "AI provider transport error"
                    );
                    let mut conn = self.pool.get().await?;
                    state_machine::rollback_to_catalog_parsed(&mut conn, articulum_id).await?;
                    return Err(err.into());
                }
                return Err(err.into());
            }
        };

        match outcome {
            PipelineOutcome::Validated { survivor_count } => {
                let skip_object_parsing = self.config.skip_object_parsing;
                let mut conn = self.pool.get().await?;
                conn.transaction(|conn| {
                    async move {
                        if !state_machine::to_validated(conn, articulum_id).await? {
                            anyhow::bail!(
                                "articulum {articulum_id} left VALIDATING before pipeline completed"
                            );
                        }
                        if !skip_object_parsing {
                            object_queue::create_tasks_for_articulum_conn(conn, articulum_id).await?;
                        }
                        Ok(())
                    }
                    .scope_boxed()
                })
                .await?;
                tracing::info!(articulum_id, survivor_count, "articulum validated");
            }
            PipelineOutcome::Rejected { stage, survivor_count } => {
                let mut conn = self.pool.get().await?;
                state_machine::reject(&mut conn, articulum_id).await?;
                tracing::info!(articulum_id, ?stage, survivor_count, "articulum rejected");
            }
        }

        Ok(())
    }
}

fn is_ai_transport_error(err: &validation::ValidationError) -> bool {
    matches!(
        err,
        validation::ValidationError::AiProvider(crate::validation::ai::AiProviderError::Transport(_))
    )
}
