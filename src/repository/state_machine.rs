//! Articulum State Machine: sole writer of `articulums.state`.
//!
//! Every transition is a single conditional `UPDATE ... WHERE state = $from`,
//! never an optimistic-retry loop — the caller decides what a lost race
//! means (benign null for acquire, a raised error for `complete_*`).

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};
use thiserror::Error;

use crate::models::ArticulumState;
use crate::schema::articulums::dsl as a;

#[derive(Error, Debug)]
pub enum StateMachineError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("cannot transition articulum {id} out of terminal state {from}")]
    TerminalState { id: i32, from: ArticulumState },
}

pub type Result<T> = std::result::Result<T, StateMachineError>;

/// Attempt `from -> to` on `articulum_id`. Returns `true` iff the row existed
/// and was in `from`. Panics-as-error (never touches the DB) if `from` is
/// terminal — that is always a programmer mistake, not a race.
pub async fn transition<C>(
    conn: &mut C,
    articulum_id: i32,
    from: ArticulumState,
    to: ArticulumState,
) -> Result<bool>
where
    C: AsyncConnection<Backend = diesel::pg::Pg>,
{
    if from.is_terminal() {
        return Err(StateMachineError::TerminalState {
            id: articulum_id,
            from,
        });
    }

    let now = Utc::now();
    let affected = diesel::update(a::articulums)
        .filter(a::id.eq(articulum_id))
        .filter(a::state.eq(from.as_str()))
        .set((
            a::state.eq(to.as_str()),
            a::state_updated_at.eq(now),
            a::updated_at.eq(now),
        ))
        .execute(conn)
        .await?;

    Ok(affected == 1)
}

pub async fn to_catalog_parsing<C>(conn: &mut C, articulum_id: i32) -> Result<bool>
where
    C: AsyncConnection<Backend = diesel::pg::Pg>,
{
    transition(
        conn,
        articulum_id,
        ArticulumState::New,
        ArticulumState::CatalogParsing,
    )
    .await
}

pub async fn to_catalog_parsed<C>(conn: &mut C, articulum_id: i32) -> Result<bool>
where
    C: AsyncConnection<Backend = diesel::pg::Pg>,
{
    transition(
        conn,
        articulum_id,
        ArticulumState::CatalogParsing,
        ArticulumState::CatalogParsed,
    )
    .await
}

pub async fn to_validating<C>(conn: &mut C, articulum_id: i32) -> Result<bool>
where
    C: AsyncConnection<Backend = diesel::pg::Pg>,
{
    transition(
        conn,
        articulum_id,
        ArticulumState::CatalogParsed,
        ArticulumState::Validating,
    )
    .await
}

pub async fn to_validated<C>(conn: &mut C, articulum_id: i32) -> Result<bool>
where
    C: AsyncConnection<Backend = diesel::pg::Pg>,
{
    transition(
        conn,
        articulum_id,
        ArticulumState::Validating,
        ArticulumState::Validated,
    )
    .await
}

pub async fn to_object_parsing<C>(conn: &mut C, articulum_id: i32) -> Result<bool>
where
    C: AsyncConnection<Backend = diesel::pg::Pg>,
{
    transition(
        conn,
        articulum_id,
        ArticulumState::Validated,
        ArticulumState::ObjectParsing,
    )
    .await
}

/// `VALIDATING -> REJECTED_BY_MIN_COUNT`. `reason` is logged by the caller
/// only — it is never persisted, matching the original system exactly.
pub async fn reject<C>(conn: &mut C, articulum_id: i32) -> Result<bool>
where
    C: AsyncConnection<Backend = diesel::pg::Pg>,
{
    transition(
        conn,
        articulum_id,
        ArticulumState::Validating,
        ArticulumState::RejectedByMinCount,
    )
    .await
}

/// Recovery edge used only when the AI collaborator is unavailable.
pub async fn rollback_to_catalog_parsed<C>(conn: &mut C, articulum_id: i32) -> Result<bool>
where
    C: AsyncConnection<Backend = diesel::pg::Pg>,
{
    transition(
        conn,
        articulum_id,
        ArticulumState::Validating,
        ArticulumState::CatalogParsed,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_source_states_are_rejected_before_touching_the_database() {
        for state in [ArticulumState::ObjectParsing, ArticulumState::RejectedByMinCount] {
            assert!(state.is_terminal());
        }
    }
}
