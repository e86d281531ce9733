//! Redis-backed pending-group storage.

use flowsight_core::correlation::{CorrelationError, GroupStore, MessageGroup, Result};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

/// Key prefix for pending groups.
const GROUP_PREFIX: &str = "correlation:group:";

/// Redis-backed [`GroupStore`].
///
/// Groups are stored as bincode blobs under `correlation:group:{key}`. Redis
/// gives read-after-write visibility across every consumer process sharing
/// the instance, which is what makes the multi-consumer deployment correct
/// (together with [`crate::RedisLockRegistry`]).
///
/// # Example
///
/// ```no_run
/// use flowsight_redis::RedisGroupStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = RedisGroupStore::new("redis://127.0.0.1:6379").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RedisGroupStore {
    conn_manager: ConnectionManager,
}

impl RedisGroupStore {
    /// Connect to a Redis instance.
    ///
    /// # Errors
    ///
    /// Returns [`CorrelationError::Store`] if the connection fails.
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| CorrelationError::Store(format!("Failed to create Redis client: {e}")))?;

        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            CorrelationError::Store(format!("Failed to create Redis connection manager: {e}"))
        })?;

        Ok(Self { conn_manager })
    }

    fn group_key(correlation_key: &str) -> String {
        format!("{GROUP_PREFIX}{correlation_key}")
    }

    /// Correlation keys that currently hold unmatched partials, for
    /// operational inspection.
    ///
    /// Uses `SCAN`, so it is safe on live instances but only eventually
    /// consistent with concurrent writes.
    ///
    /// # Errors
    ///
    /// Returns [`CorrelationError::Store`] on backend failure.
    pub async fn pending_keys(&self) -> Result<Vec<String>> {
        let mut conn = self.conn_manager.clone();
        let mut keys = Vec::new();

        let mut cursor = 0u64;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(format!("{GROUP_PREFIX}*"))
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .map_err(|e| CorrelationError::Store(format!("Failed to scan keys: {e}")))?;

            keys.extend(
                batch
                    .into_iter()
                    .filter_map(|k| k.strip_prefix(GROUP_PREFIX).map(ToString::to_string)),
            );

            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        Ok(keys)
    }
}

impl GroupStore for RedisGroupStore {
    async fn get(&self, correlation_key: &str) -> Result<Option<MessageGroup>> {
        let mut conn = self.conn_manager.clone();

        let bytes: Option<Vec<u8>> = conn
            .get(Self::group_key(correlation_key))
            .await
            .map_err(|e| CorrelationError::Store(format!("Failed to get group: {e}")))?;

        bytes
            .map(|b| {
                bincode::deserialize(&b).map_err(|e| {
                    CorrelationError::Serialization(format!("Failed to decode group: {e}"))
                })
            })
            .transpose()
    }

    async fn put(&self, group: &MessageGroup) -> Result<()> {
        let mut conn = self.conn_manager.clone();

        let bytes = bincode::serialize(group)
            .map_err(|e| CorrelationError::Serialization(format!("Failed to encode group: {e}")))?;

        let _: () = conn
            .set(Self::group_key(&group.correlation_key), bytes)
            .await
            .map_err(|e| CorrelationError::Store(format!("Failed to save group: {e}")))?;

        Ok(())
    }

    async fn delete(&self, correlation_key: &str) -> Result<()> {
        let mut conn = self.conn_manager.clone();

        let _: () = conn
            .del(Self::group_key(correlation_key))
            .await
            .map_err(|e| CorrelationError::Store(format!("Failed to delete group: {e}")))?;

        Ok(())
    }
}
