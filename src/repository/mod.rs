//! Repository layer: Postgres-backed persistence and the domain operations
//! built on top of it (state machine transitions, the two task queues, the
//! proxy pool, and listing/validation/object-data storage).

#[macro_use]
pub mod pool;

pub mod catalog_queue;
pub mod listings;
pub mod migrations;
pub mod object_queue;
pub mod pg_tls;
pub mod proxy_pool;
pub mod state_machine;
pub mod util;

pub use pool::{DbError, PgConn, PgPool};

use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use thiserror::Error;

use crate::models::Articulum;
use crate::schema::articulums::dsl as a;

/// Errors surfaced by the domain-operation modules above. Pool-checkout
/// failures are folded into `Database` by `util::to_diesel_error` before they
/// ever reach here, so this stays a thin wrapper over diesel's error type.
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, RepositoryError>;

/// Connect to `database_url` and return a pool sized for `max_size`
/// concurrent checkouts.
pub fn connect(database_url: &str, max_size: usize, no_tls: bool) -> Result<PgPool> {
    util::validate_database_url(database_url)?;
    Ok(PgPool::new(database_url, max_size, no_tls)?)
}

/// Run all embedded migrations against `database_url`.
pub async fn run_all_migrations(database_url: &str, no_tls: bool) -> Result<()> {
    migrations::run_migrations(database_url, no_tls).await?;
    Ok(())
}

/// Look up one articulum by id. Workers need this to recover the external
/// part-number string (e.g. for the mechanical validator's articulum-in-text
/// check, or to build a catalog parser's search context) from a task row
/// that only carries the numeric foreign key.
pub async fn find_articulum(pool: &PgPool, id: i32) -> Result<Option<Articulum>> {
    let mut conn = pool.get().await?;
    Ok(a::articulums
        .filter(a::id.eq(id))
        .select(Articulum::as_select())
        .first(&mut conn)
        .await
        .optional()?)
}

/// Every articulum currently sitting in `state`. Used by the supervisor's
/// boot-time seeding pass (`NEW` for catalog tasks, `VALIDATED` for object
/// tasks).
pub async fn articulums_in_state(
    pool: &PgPool,
    state: crate::models::ArticulumState,
) -> Result<Vec<Articulum>> {
    let mut conn = pool.get().await?;
    Ok(a::articulums
        .filter(a::state.eq(state.as_str()))
        .select(Articulum::as_select())
        .load(&mut conn)
        .await?)
}
