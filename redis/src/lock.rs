//! Lease-based distributed locks on Redis.
//!
//! # Overview
//!
//! Acquisition is `SET key token NX PX lease_ms`, polled until the deadline.
//! The token is unique per acquisition; release is a compare-and-delete
//! script so a guard can never delete a lock it lost to lease expiry, and
//! `verify` re-checks the token so a holder that outlived its lease fails
//! its critical section instead of writing without exclusion. The lease
//! bounds how long a crashed holder can strand a key.

use flowsight_core::lock::{self, LockError, LockGuard, LockRegistry};
use redis::aio::ConnectionManager;
use redis::Script;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Key prefix for lock entries.
const LOCK_PREFIX: &str = "correlation:lock:";

/// Default lock acquisition deadline.
const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default lease after which an unreleased lock expires on its own.
const DEFAULT_LEASE: Duration = Duration::from_secs(30);

/// Poll interval between acquisition attempts.
const RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Delete the lock only if it still holds our token.
const RELEASE_SCRIPT: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
";

/// Redis-backed [`LockRegistry`] with per-acquisition tokens and leases.
#[derive(Clone)]
pub struct RedisLockRegistry {
    conn_manager: ConnectionManager,
    acquire_timeout: Duration,
    lease: Duration,
}

impl RedisLockRegistry {
    /// Connect to a Redis instance with default deadlines.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Backend`] if the connection fails.
    pub async fn new(redis_url: &str) -> lock::Result<Self> {
        let client = redis::Client::open(redis_url).map_err(|e| LockError::Backend {
            key: String::new(),
            reason: format!("Failed to create Redis client: {e}"),
        })?;

        let conn_manager = ConnectionManager::new(client)
            .await
            .map_err(|e| LockError::Backend {
                key: String::new(),
                reason: format!("Failed to create Redis connection manager: {e}"),
            })?;

        Ok(Self {
            conn_manager,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            lease: DEFAULT_LEASE,
        })
    }

    /// Set a custom acquisition deadline.
    #[must_use]
    pub const fn with_timeout(mut self, acquire_timeout: Duration) -> Self {
        self.acquire_timeout = acquire_timeout;
        self
    }

    /// Set a custom lease duration. Must comfortably exceed the longest
    /// critical section, or a slow holder loses the lock mid-section.
    #[must_use]
    pub const fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    fn lock_key(key: &str) -> String {
        format!("{LOCK_PREFIX}{key}")
    }
}

/// Process-unique token so releases cannot touch a lock held by someone else.
fn lock_token() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("{nanos}-{n}")
}

struct RedisLockGuard {
    conn_manager: ConnectionManager,
    lock_key: String,
    token: String,
}

impl LockGuard for RedisLockGuard {
    fn verify(&mut self) -> Pin<Box<dyn Future<Output = lock::Result<()>> + Send + '_>> {
        let mut conn = self.conn_manager.clone();
        let lock_key = self.lock_key.clone();
        let token = self.token.clone();
        Box::pin(async move {
            let held: Option<String> = redis::cmd("GET")
                .arg(&lock_key)
                .query_async(&mut conn)
                .await
                .map_err(|e| LockError::Backend {
                    key: lock_key.clone(),
                    reason: format!("Lock ownership check failed: {e}"),
                })?;

            if held.as_deref() == Some(token.as_str()) {
                Ok(())
            } else {
                Err(LockError::Backend {
                    key: lock_key,
                    reason: "Lease expired before the critical section finished".to_string(),
                })
            }
        })
    }
}

impl Drop for RedisLockGuard {
    fn drop(&mut self) {
        let mut conn = self.conn_manager.clone();
        let lock_key = std::mem::take(&mut self.lock_key);
        let token = std::mem::take(&mut self.token);
        tokio::spawn(async move {
            let script = Script::new(RELEASE_SCRIPT);
            if let Err(e) = script
                .key(&lock_key)
                .arg(&token)
                .invoke_async::<()>(&mut conn)
                .await
            {
                tracing::warn!(key = %lock_key, error = %e, "Failed to release Redis lock");
            }
        });
    }
}

impl LockRegistry for RedisLockRegistry {
    fn lock(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = lock::Result<Box<dyn LockGuard>>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            let lock_key = Self::lock_key(&key);
            let token = lock_token();
            let lease_ms = u64::try_from(self.lease.as_millis()).unwrap_or(u64::MAX);
            let mut conn = self.conn_manager.clone();

            let deadline = tokio::time::Instant::now() + self.acquire_timeout;
            loop {
                let acquired: Option<String> = redis::cmd("SET")
                    .arg(&lock_key)
                    .arg(&token)
                    .arg("NX")
                    .arg("PX")
                    .arg(lease_ms)
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| LockError::Backend {
                        key: key.clone(),
                        reason: format!("Lock SET failed: {e}"),
                    })?;

                if acquired.is_some() {
                    return Ok(Box::new(RedisLockGuard {
                        conn_manager: self.conn_manager.clone(),
                        lock_key,
                        token,
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
    fn tokens_are_unique() {
        assert_ne!(lock_token(), lock_token());
    }
}
