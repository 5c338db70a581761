//! PostgreSQL connection pool.
//!
//! The coordination engine targets Postgres exclusively — advisory locks,
//! `FOR UPDATE SKIP LOCKED`, and jsonb columns have no SQLite equivalent, so
//! there is no backend-dispatch layer here, unlike the document-store
//! ancestor of this crate.

use diesel_async::pooled_connection::deadpool::Pool as DeadPool;
use diesel_async::pooled_connection::{AsyncDieselConnectionManager, ManagerConfig};
use diesel_async::AsyncPgConnection;

use super::pg_tls::establish_tls_connection;
use super::util::to_diesel_error;

/// Diesel error type alias.
pub type DbError = diesel::result::Error;

/// A checked-out connection.
pub type PgConn = deadpool::managed::Object<AsyncDieselConnectionManager<AsyncPgConnection>>;

#[derive(Clone)]
pub struct PgPool {
    pool: DeadPool<AsyncPgConnection>,
}

impl PgPool {
    /// Build a pool from a `postgres://` URL, connecting over TLS unless
    /// `no_tls` is set (development/CI against a local, untrusted-cert server).
    pub fn new(database_url: &str, max_size: usize, no_tls: bool) -> Result<Self, DbError> {
        let mut manager_config = ManagerConfig::default();
        if !no_tls {
            manager_config.custom_setup = Box::new(|url| establish_tls_connection(url));
        }

        let config = AsyncDieselConnectionManager::<AsyncPgConnection>::new_with_config(
            database_url,
            manager_config,
        );
        let pool = DeadPool::builder(config)
            .max_size(max_size)
            .build()
            .map_err(to_diesel_error)?;
        Ok(Self { pool })
    }

    pub async fn get(&self) -> Result<PgConn, DbError> {
        self.pool.get().await.map_err(to_diesel_error)
    }
}

/// Acquire a connection from `$pool` and run `$body` against it, propagating
/// pool-checkout errors through `?` like any other `diesel::result::Error`.
#[macro_export]
macro_rules! with_conn {
    ($pool:expr, $conn:ident => $body:expr) => {{
        let mut $conn = $pool.get().await?;
        $body
    }};
}

#[allow(unused_imports)]
pub use with_conn;
