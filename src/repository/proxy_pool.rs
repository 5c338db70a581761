//! Proxy Pool Manager: exclusive per-worker leases over `proxies`, a
//! two-stage error budget (counted transient errors vs. immediate permanent
//! blocks), and no automatic unblock.

use std::time::Duration;

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use thiserror::Error;

use crate::models::Proxy;
use crate::schema::proxies::dsl as p;

use super::pool::PgPool;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
}

pub type Result<T> = std::result::Result<T, ProxyError>;

/// Aggregate counts used by operability tooling and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProxyStats {
    pub total: i64,
    pub available: i64,
    pub in_use: i64,
    pub blocked: i64,
}

#[derive(Clone)]
pub struct ProxyPool {
    pool: PgPool,
}

impl ProxyPool {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Claim one available, unblocked proxy for `worker_id`, skipping rows
    /// already locked by a concurrent acquirer. Returns `None` if the pool
    /// is momentarily exhausted — not an error.
    pub async fn acquire(&self, worker_id: &str) -> Result<Option<Proxy>> {
        let mut conn = self.pool.get().await?;

        let candidate: Option<Proxy> = p::proxies
            .filter(p::is_blocked.eq(false))
            .filter(p::is_in_use.eq(false))
            .order(p::id.asc())
            .select(Proxy::as_select())
            .for_update()
            .skip_locked()
            .first(&mut conn)
            .await
            .optional()?;

        let Some(candidate) = candidate else {
            return Ok(None);
        };

        let now = Utc::now();
        let leased = diesel::update(p::proxies.filter(p::id.eq(candidate.id)))
            .set((
                p::is_in_use.eq(true),
                p::worker_id.eq(worker_id),
                p::updated_at.eq(now),
            ))
            .get_result(&mut conn)
            .await?;

        Ok(Some(leased))
    }

    /// Poll `acquire` at a fixed interval until one succeeds. Unbounded by
    /// default; callers that need a deadline race this against their own
    /// `tokio::time::timeout`.
    pub async fn acquire_with_wait(&self, worker_id: &str, poll_interval: Duration) -> Result<Proxy> {
        loop {
            if let Some(proxy) = self.acquire(worker_id).await? {
                return Ok(proxy);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Clear ownership iff the proxy is not blocked. A blocked proxy's
    /// `is_in_use` is cleared by `block` itself, never by `release`.
    pub async fn release(&self, proxy_id: i32) -> Result<()> {
        let mut conn = self.pool.get().await?;
        diesel::update(p::proxies.filter(p::id.eq(proxy_id)).filter(p::is_blocked.eq(false)))
            .set((
                p::is_in_use.eq(false),
                p::worker_id.eq(None::<String>),
                p::updated_at.eq(Utc::now()),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    /// Permanently block a proxy and release ownership. `reason` is logged
    /// only, never persisted.
    pub async fn block(&self, proxy_id: i32, reason: &str) -> Result<()> {
        tracing::warn!(proxy_id, reason, "blocking proxy");
        let mut conn = self.pool.get().await?;
        diesel::update(p::proxies.filter(p::id.eq(proxy_id)))
            .set((
                p::is_blocked.eq(true),
                p::is_in_use.eq(false),
                p::worker_id.eq(None::<String>),
                p::updated_at.eq(Utc::now()),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    /// Bump `consecutive_errors`; at the configured threshold, block the
    /// proxy, otherwise release it back to the pool. `last_error_at` is
    /// stamped on both branches.
    pub async fn increment_error(
        &self,
        proxy_id: i32,
        description: &str,
        block_threshold: i32,
    ) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let now = Utc::now();

        let proxy: Proxy = diesel::update(p::proxies.filter(p::id.eq(proxy_id)))
            .set((
                p::consecutive_errors.eq(p::consecutive_errors + 1),
                p::last_error_at.eq(now),
                p::updated_at.eq(now),
            ))
            .get_result(&mut conn)
            .await?;

        if proxy.consecutive_errors >= block_threshold {
            drop(conn);
            self.block(proxy_id, description).await?;
            Ok(true)
        } else {
            diesel::update(p::proxies.filter(p::id.eq(proxy_id)).filter(p::is_blocked.eq(false)))
                .set((
                    p::is_in_use.eq(false),
                    p::worker_id.eq(None::<String>),
                    p::updated_at.eq(Utc::now()),
                ))
                .execute(&mut conn)
                .await?;
            Ok(false)
        }
    }

    /// Reset the error budget. Called on any confirmed success so transient
    /// blips don't accumulate toward a block across unrelated tasks.
    pub async fn reset_error_counter(&self, proxy_id: i32) -> Result<()> {
        let mut conn = self.pool.get().await?;
        diesel::update(p::proxies.filter(p::id.eq(proxy_id)))
            .set((p::consecutive_errors.eq(0), p::updated_at.eq(Utc::now())))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    /// Which proxy, if any, `worker_id` currently holds.
    pub async fn get_worker_proxy(&self, worker_id: &str) -> Result<Option<Proxy>> {
        let mut conn = self.pool.get().await?;
        Ok(p::proxies
            .filter(p::worker_id.eq(worker_id))
            .filter(p::is_in_use.eq(true))
            .select(Proxy::as_select())
            .first(&mut conn)
            .await
            .optional()?)
    }

    pub async fn stats(&self) -> Result<ProxyStats> {
        let mut conn = self.pool.get().await?;

        let total: i64 = p::proxies.count().get_result(&mut conn).await?;
        let blocked: i64 = p::proxies
            .filter(p::is_blocked.eq(true))
            .count()
            .get_result(&mut conn)
            .await?;
        let in_use: i64 = p::proxies
            .filter(p::is_in_use.eq(true))
            .count()
            .get_result(&mut conn)
            .await?;
        let available: i64 = p::proxies
            .filter(p::is_blocked.eq(false))
            .filter(p::is_in_use.eq(false))
            .count()
            .get_result(&mut conn)
            .await?;

        Ok(ProxyStats {
            total,
            available,
            in_use,
            blocked,
        })
    }

    /// Release any proxy currently held by `worker_id`, regardless of which
    /// task it was leased for. Used by the heartbeat checker, which knows
    /// the abandoned task's `worker_id` but not which proxy row it maps to.
    pub async fn release_by_worker(&self, worker_id: &str) -> Result<()> {
        let mut conn = self.pool.get().await?;
        diesel::update(
            p::proxies
                .filter(p::worker_id.eq(worker_id))
                .filter(p::is_blocked.eq(false)),
        )
        .set((
            p::is_in_use.eq(false),
            p::worker_id.eq(None::<String>),
            p::updated_at.eq(Utc::now()),
        ))
        .execute(&mut conn)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_default_is_all_zero() {
        assert_eq!(ProxyStats::default(), ProxyStats { total: 0, available: 0, in_use: 0, blocked: 0 });
    }
}
