//! In-memory projection persistence for fast, deterministic tests.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Lock poisoning only happens after a test already failed

use flowsight_core::projection::{
    ProjectionEntity, ProjectionError, ProjectionTx, ReadCache, Result, UnitOfWork,
};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

/// In-memory unit of work with real transaction semantics.
///
/// Writes are staged per transaction and only become visible on
/// [`ProjectionTx::commit`]; [`ProjectionTx::rollback`] discards them. That
/// makes it a faithful stand-in for the Postgres unit of work in receiver and
/// dispatcher tests.
///
/// # Example
///
/// ```
/// use flowsight_testing::InMemoryUnitOfWork;
/// use flowsight_core::projection::{ProjectionTx, UnitOfWork};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let uow = InMemoryUnitOfWork::new();
/// let mut tx = uow.begin().await?;
/// assert!(tx.load("p1").await?.is_none());
/// tx.rollback().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryUnitOfWork {
    entities: Arc<RwLock<HashMap<String, ProjectionEntity>>>,
    fail_commits: Arc<AtomicBool>,
}

impl InMemoryUnitOfWork {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent commit fail with a transaction error, for
    /// exercising the retriable-batch path.
    pub fn set_fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Clone of the committed state, for assertions.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, ProjectionEntity> {
        self.entities.read().unwrap().clone()
    }

    /// Committed entity by id, for assertions.
    #[must_use]
    pub fn get(&self, entity_id: &str) -> Option<ProjectionEntity> {
        self.entities.read().unwrap().get(entity_id).cloned()
    }

    /// Drop all committed state (test isolation).
    pub fn clear(&self) {
        self.entities.write().unwrap().clear();
    }
}

impl UnitOfWork for InMemoryUnitOfWork {
    type Tx = InMemoryTx;

    async fn begin(&self) -> Result<Self::Tx> {
        Ok(InMemoryTx {
            base: Arc::clone(&self.entities),
            staged: HashMap::new(),
            fail_commit: self.fail_commits.load(Ordering::SeqCst),
        })
    }
}

/// A staged transaction over [`InMemoryUnitOfWork`].
#[derive(Debug)]
pub struct InMemoryTx {
    base: Arc<RwLock<HashMap<String, ProjectionEntity>>>,
    staged: HashMap<String, ProjectionEntity>,
    fail_commit: bool,
}

impl ProjectionTx for InMemoryTx {
    async fn load(&mut self, entity_id: &str) -> Result<Option<ProjectionEntity>> {
        if let Some(staged) = self.staged.get(entity_id) {
            return Ok(Some(staged.clone()));
        }
        Ok(self.base.read().unwrap().get(entity_id).cloned())
    }

    async fn persist(&mut self, entity: &ProjectionEntity) -> Result<()> {
        self.staged.insert(entity.entity_id.clone(), entity.clone());
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        if self.fail_commit {
            return Err(ProjectionError::Transaction(
                "commit failure injected".to_string(),
            ));
        }
        let mut base = self.base.write().unwrap();
        for (key, entity) in self.staged {
            base.insert(key, entity);
        }
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        // Staged writes are dropped with self.
        Ok(())
    }
}

/// Read cache that records which entity ids were invalidated.
#[derive(Debug, Default)]
pub struct RecordingReadCache {
    invalidated: RwLock<Vec<String>>,
    cleared: AtomicBool,
}

impl RecordingReadCache {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Entity ids invalidated so far, in call order.
    #[must_use]
    pub fn invalidated(&self) -> Vec<String> {
        self.invalidated.read().unwrap().clone()
    }

    /// Whether [`ReadCache::clear`] was called.
    #[must_use]
    pub fn was_cleared(&self) -> bool {
        self.cleared.load(Ordering::SeqCst)
    }
}

impl ReadCache for RecordingReadCache {
    fn invalidate(
        &self,
        entity_ids: &[String],
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        let entity_ids = entity_ids.to_vec();
        Box::pin(async move {
            self.invalidated.write().unwrap().extend(entity_ids);
        })
    }

    fn clear(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            self.cleared.store(true, Ordering::SeqCst);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use flowsight_core::event::EntityType;

    fn entity(id: &str) -> ProjectionEntity {
        ProjectionEntity::new(id, EntityType::Process, "process-1", Utc::now())
    }

    #[tokio::test]
    async fn commit_publishes_staged_writes() {
        let uow = InMemoryUnitOfWork::new();
        let mut tx = uow.begin().await.unwrap();
        tx.persist(&entity("p1")).await.unwrap();

        // Not visible before commit.
        assert!(uow.get("p1").is_none());

        tx.commit().await.unwrap();
        assert!(uow.get("p1").is_some());
    }

    #[tokio::test]
    async fn rollback_discards_staged_writes() {
        let uow = InMemoryUnitOfWork::new();
        let mut tx = uow.begin().await.unwrap();
        tx.persist(&entity("p1")).await.unwrap();
        tx.rollback().await.unwrap();

        assert!(uow.snapshot().is_empty());
    }

    #[tokio::test]
    async fn transaction_sees_its_own_writes() {
        let uow = InMemoryUnitOfWork::new();
        let mut tx = uow.begin().await.unwrap();
        tx.persist(&entity("p1")).await.unwrap();
        assert!(tx.load("p1").await.unwrap().is_some());
        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn injected_commit_failure_surfaces() {
        let uow = InMemoryUnitOfWork::new();
        uow.set_fail_commits(true);
        let mut tx = uow.begin().await.unwrap();
        tx.persist(&entity("p1")).await.unwrap();
        assert!(tx.commit().await.is_err());
        assert!(uow.snapshot().is_empty());
    }
}
