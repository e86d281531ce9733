//! `PostgreSQL` backends for correlation state: group store and advisory locks.
//!
//! # Overview
//!
//! [`PostgresGroupStore`] keeps pending groups in a key/blob table so several
//! consumer processes can share one correlation backend. [`PostgresLockRegistry`]
//! grants the per-key critical section with session advisory locks, which the
//! database releases automatically if the holding session dies.
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE correlation_groups (
//!     correlation_key TEXT PRIMARY KEY,
//!     data BYTEA NOT NULL,
//!     updated_at TIMESTAMPTZ NOT NULL
//! );
//! ```

use flowsight_core::correlation::{CorrelationError, GroupStore, MessageGroup, Result};
use flowsight_core::lock::{self, LockError, LockGuard, LockRegistry};
use sqlx::postgres::{PgPool, Postgres};
use sqlx::pool::PoolConnection;
use std::future::Future;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::pin::Pin;
use std::time::Duration;

/// `PostgreSQL`-backed [`GroupStore`].
#[derive(Clone)]
pub struct PostgresGroupStore {
    pool: PgPool,
}

impl PostgresGroupStore {
    /// Create a group store over an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the group table if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`CorrelationError::Store`] if the DDL fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS correlation_groups (
                correlation_key TEXT PRIMARY KEY,
                data BYTEA NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| CorrelationError::Store(format!("Migration failed: {e}")))?;

        Ok(())
    }

    /// Correlation keys that currently hold unmatched partials, for
    /// operational inspection.
    ///
    /// # Errors
    ///
    /// Returns [`CorrelationError::Store`] on query failure.
    pub async fn pending_keys(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT correlation_key FROM correlation_groups ORDER BY updated_at")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| CorrelationError::Store(format!("Failed to list keys: {e}")))?;

        Ok(rows.into_iter().map(|(key,)| key).collect())
    }
}

impl GroupStore for PostgresGroupStore {
    async fn get(&self, correlation_key: &str) -> Result<Option<MessageGroup>> {
        let row: Option<(Vec<u8>,)> =
            sqlx::query_as("SELECT data FROM correlation_groups WHERE correlation_key = $1")
                .bind(correlation_key)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| CorrelationError::Store(format!("Failed to load group: {e}")))?;

        row.map(|(data,)| {
            bincode::deserialize(&data)
                .map_err(|e| CorrelationError::Serialization(format!("Failed to decode group: {e}")))
        })
        .transpose()
    }

    async fn put(&self, group: &MessageGroup) -> Result<()> {
        let data = bincode::serialize(group)
            .map_err(|e| CorrelationError::Serialization(format!("Failed to encode group: {e}")))?;

        sqlx::query(
            "INSERT INTO correlation_groups (correlation_key, data, updated_at)
             VALUES ($1, $2, now())
             ON CONFLICT (correlation_key) DO UPDATE
             SET data = EXCLUDED.data, updated_at = now()",
        )
        .bind(&group.correlation_key)
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(|e| CorrelationError::Store(format!("Failed to save group: {e}")))?;

        Ok(())
    }

    async fn delete(&self, correlation_key: &str) -> Result<()> {
        sqlx::query("DELETE FROM correlation_groups WHERE correlation_key = $1")
            .bind(correlation_key)
            .execute(&self.pool)
            .await
            .map_err(|e| CorrelationError::Store(format!("Failed to delete group: {e}")))?;

        Ok(())
    }
}

/// Default lock acquisition deadline.
const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Poll interval between `pg_try_advisory_lock` attempts.
const RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// [`LockRegistry`] backed by `PostgreSQL` session advisory locks.
///
/// Keys are hashed to the 64-bit lock id space. Each acquired lock pins one
/// pool connection for its lifetime; release happens on guard drop, and the
/// database itself releases the lock if the session dies, so a crashed
/// consumer cannot strand a key.
#[derive(Clone)]
pub struct PostgresLockRegistry {
    pool: PgPool,
    acquire_timeout: Duration,
}

impl PostgresLockRegistry {
    /// Create a registry with the default 10s acquisition deadline.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self {
            pool,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
        }
    }

    /// Set a custom acquisition deadline.
    #[must_use]
    pub const fn with_timeout(mut self, acquire_timeout: Duration) -> Self {
        self.acquire_timeout = acquire_timeout;
        self
    }
}

/// Map a correlation key onto the advisory lock id space.
fn lock_id(key: &str) -> i64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    // Advisory lock ids are i64; the wrap keeps the full 64-bit distribution.
    #[allow(clippy::cast_possible_wrap)]
    let id = hasher.finish() as i64;
    id
}

struct PgAdvisoryGuard {
    conn: Option<PoolConnection<Postgres>>,
    lock_id: i64,
    key: String,
}

impl LockGuard for PgAdvisoryGuard {
    fn verify(&mut self) -> Pin<Box<dyn Future<Output = lock::Result<()>> + Send + '_>> {
        Box::pin(async move {
            let key = self.key.clone();
            let conn = self.conn.as_mut().ok_or_else(|| LockError::Backend {
                key: key.clone(),
                reason: "Lock connection already released".to_string(),
            })?;

            // Session advisory locks live exactly as long as the session, so
            // a liveness ping on the pinned connection proves ownership.
            sqlx::query("SELECT 1")
                .execute(&mut **conn)
                .await
                .map_err(|e| LockError::Backend {
                    key,
                    reason: format!("Lock session lost: {e}"),
                })?;

            Ok(())
        })
    }
}

impl Drop for PgAdvisoryGuard {
    fn drop(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            let lock_id = self.lock_id;
            // Advisory locks are session-scoped: unlock on the same
            // connection before it returns to the pool.
            tokio::spawn(async move {
                if let Err(e) = sqlx::query("SELECT pg_advisory_unlock($1)")
                    .bind(lock_id)
                    .execute(&mut *conn)
                    .await
                {
                    tracing::warn!(lock_id, error = %e, "Failed to release advisory lock");
                }
            });
        }
    }
}

impl LockRegistry for PostgresLockRegistry {
    fn lock(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = lock::Result<Box<dyn LockGuard>>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            let lock_id = lock_id(&key);

            let mut conn = self.pool.acquire().await.map_err(|e| LockError::Backend {
                key: key.clone(),
                reason: format!("Failed to acquire connection: {e}"),
            })?;

            let deadline = tokio::time::Instant::now() + self.acquire_timeout;
            loop {
                let (acquired,): (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
                    .bind(lock_id)
                    .fetch_one(&mut *conn)
                    .await
                    .map_err(|e| LockError::Backend {
                        key: key.clone(),
                        reason: format!("Advisory lock query failed: {e}"),
                    })?;

                if acquired {
                    return Ok(Box::new(PgAdvisoryGuard {
                        conn: Some(conn),
                        lock_id,
                        key,
                    }) as Box<dyn LockGuard>);
                }

                if tokio::time::Instant::now() >= deadline {
                    return Err(LockError::Timeout { key });
                }
                tokio::time::sleep(RETRY_INTERVAL).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_ids_are_stable_and_key_dependent() {
        assert_eq!(lock_id("order-7"), lock_id("order-7"));
        assert_ne!(lock_id("order-7"), lock_id("order-8"));
    }
}
