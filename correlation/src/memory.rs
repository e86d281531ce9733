//! Process-local group store and lock registry.
//!
//! These are the single-consumer deployment backends: correct whenever every
//! partial for a given correlation key is handled by this process. Deployments
//! with several consumer processes use the shared backends in
//! `flowsight-postgres` / `flowsight-redis` instead.

use flowsight_core::correlation::{GroupStore, MessageGroup, Result};
use flowsight_core::lock::{self, LockError, LockGuard, LockRegistry};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

/// In-memory [`GroupStore`]: a map from correlation key to pending group.
///
/// State does not survive a restart; in-flight partials are recovered by
/// transport redelivery, not by this store.
#[derive(Clone, Debug, Default)]
pub struct InMemoryGroupStore {
    groups: Arc<RwLock<HashMap<String, MessageGroup>>>,
}

impl InMemoryGroupStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Correlation keys that currently hold unmatched partials, for
    /// operational inspection.
    pub async fn pending_keys(&self) -> Vec<String> {
        self.groups.read().await.keys().cloned().collect()
    }
}

impl GroupStore for InMemoryGroupStore {
    async fn get(&self, correlation_key: &str) -> Result<Option<MessageGroup>> {
        Ok(self.groups.read().await.get(correlation_key).cloned())
    }

    async fn put(&self, group: &MessageGroup) -> Result<()> {
        self.groups
            .write()
            .await
            .insert(group.correlation_key.clone(), group.clone());
        Ok(())
    }

    async fn delete(&self, correlation_key: &str) -> Result<()> {
        self.groups.write().await.remove(correlation_key);
        Ok(())
    }
}

/// Default lock acquisition deadline.
const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// In-process [`LockRegistry`] backed by one `tokio` mutex per key.
///
/// Mutexes are created on first use and kept for the registry's lifetime;
/// correlation key cardinality is bounded by in-flight exchanges, so the map
/// stays small in practice.
pub struct InProcessLockRegistry {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    acquire_timeout: Duration,
}

impl InProcessLockRegistry {
    /// Create a registry with the default 10s acquisition deadline.
    #[must_use]
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_ACQUIRE_TIMEOUT)
    }

    /// Create a registry with a custom acquisition deadline.
    #[must_use]
    pub fn with_timeout(acquire_timeout: Duration) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            acquire_timeout,
        }
    }
}

impl Default for InProcessLockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

struct InProcessLockGuard {
    _guard: OwnedMutexGuard<()>,
}

impl LockGuard for InProcessLockGuard {
    fn verify(&mut self) -> Pin<Box<dyn Future<Output = lock::Result<()>> + Send + '_>> {
        // An owned mutex guard cannot lose the lock while it lives.
        Box::pin(async { Ok(()) })
    }
}

impl LockRegistry for InProcessLockRegistry {
    fn lock(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = lock::Result<Box<dyn LockGuard>>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            let mutex = {
                let mut locks = self.locks.lock().await;
                Arc::clone(locks.entry(key.clone()).or_default())
            };

            match tokio::time::timeout(self.acquire_timeout, mutex.lock_owned()).await {
                Ok(guard) => Ok(Box::new(InProcessLockGuard { _guard: guard }) as Box<dyn LockGuard>),
                Err(_) => Err(LockError::Timeout { key }),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use chrono::Utc;
    use flowsight_core::correlation::{MessagePartial, PartialKind};

    #[tokio::test]
    async fn store_roundtrip_and_delete() {
        let store = InMemoryGroupStore::new();
        let mut group = MessageGroup::new("order-7", Utc::now());
        group.push(MessagePartial::new(PartialKind::Waiting, "order-7", Utc::now()));

        store.put(&group).await.unwrap();
        assert_eq!(store.get("order-7").await.unwrap(), Some(group));
        assert_eq!(store.pending_keys().await, vec!["order-7".to_string()]);

        store.delete("order-7").await.unwrap();
        assert_eq!(store.get("order-7").await.unwrap(), None);
        assert!(store.pending_keys().await.is_empty());
    }

    #[tokio::test]
    async fn deleting_absent_key_is_a_noop() {
        let store = InMemoryGroupStore::new();
        store.delete("never-seen").await.unwrap();
    }

    #[tokio::test]
    async fn lock_excludes_same_key() {
        let registry = InProcessLockRegistry::with_timeout(Duration::from_millis(50));

        let guard = registry.lock("k").await.unwrap();
        let second = registry.lock("k").await;
        assert!(matches!(second, Err(LockError::Timeout { .. })));

        drop(guard);
        assert!(registry.lock("k").await.is_ok());
    }

    #[tokio::test]
    async fn guard_verifies_while_held() {
        let registry = InProcessLockRegistry::new();
        let mut guard = registry.lock("k").await.unwrap();
        assert!(guard.verify().await.is_ok());
    }

    #[tokio::test]
    async fn different_keys_do_not_contend() {
        let registry = InProcessLockRegistry::with_timeout(Duration::from_millis(50));
        let _a = registry.lock("a").await.unwrap();
        assert!(registry.lock("b").await.is_ok());
    }
}
