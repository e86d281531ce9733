//! The transactional entry point for event batches.
//!
//! # Contract
//!
//! [`BatchReceiver::receive`] processes one batch end to end:
//!
//! 1. Empty batches are a no-op, not an error.
//! 2. Calls are serialized through an internal mutex: one batch is fully
//!    applied (commit or rollback) before the next begins, which is what
//!    gives per-entity ordering its correctness within a consumer. Separate
//!    consumer instances run concurrently on disjoint batches.
//! 3. One unit of work spans the batch: the optimizer reduces it, the
//!    dispatcher applies it, and the commit has a bounded deadline so a stuck
//!    backend cannot wedge the consumer. On timeout or failure nothing is
//!    visible and the batch is safely redeliverable.
//! 4. The read cache is invalidated only after the commit succeeds — a
//!    post-commit hook, never during the transaction — so queries cannot see
//!    stale cache entries mixed with freshly committed rows.
//!
//! Handler errors propagate; they are never swallowed, because a silently
//! half-applied batch would leave the read model inconsistent.

use flowsight_core::event::EventBatch;
use flowsight_core::projection::{
    ProjectionError, ProjectionTx, ReadCache, Result, UnitOfWork,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::dispatcher::Dispatcher;
use crate::optimizer::EventOptimizer;

/// Default deadline for the unit-of-work commit.
const DEFAULT_COMMIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Receives event batches and applies them to the projection store, one
/// transaction per batch.
pub struct BatchReceiver<U: UnitOfWork> {
    unit_of_work: U,
    optimizer: EventOptimizer,
    dispatcher: Dispatcher,
    cache: Option<Arc<dyn ReadCache>>,
    commit_timeout: Duration,
    /// Serializes `receive` calls within this consumer instance.
    serial: Mutex<()>,
}

impl<U: UnitOfWork> BatchReceiver<U> {
    /// Create a receiver over a unit-of-work factory and handler registry.
    #[must_use]
    pub fn new(unit_of_work: U, dispatcher: Dispatcher) -> Self {
        Self {
            unit_of_work,
            optimizer: EventOptimizer::new(),
            dispatcher,
            cache: None,
            commit_timeout: DEFAULT_COMMIT_TIMEOUT,
            serial: Mutex::new(()),
        }
    }

    /// Register a read cache to invalidate after each successful commit.
    #[must_use]
    pub fn with_read_cache(mut self, cache: Arc<dyn ReadCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Override the commit deadline (default 30s).
    #[must_use]
    pub const fn with_commit_timeout(mut self, timeout: Duration) -> Self {
        self.commit_timeout = timeout;
        self
    }

    /// Apply one batch inside a single unit of work.
    ///
    /// # Errors
    ///
    /// Returns the first dispatch or storage error after rolling back, or
    /// [`ProjectionError::CommitTimeout`] if the commit misses its deadline.
    /// In every error case nothing is persisted and no cache entry is
    /// invalidated; the batch is eligible for at-least-once redelivery.
    pub async fn receive(&self, batch: EventBatch) -> Result<()> {
        if batch.is_empty() {
            tracing::debug!("Received empty batch, nothing to do");
            return Ok(());
        }

        let _serial = self.serial.lock().await;

        let received = batch.len();
        let events = self.optimizer.optimize(batch.into_events());

        let mut touched: Vec<String> = Vec::with_capacity(events.len());
        for event in &events {
            if !touched.contains(&event.entity_id) {
                touched.push(event.entity_id.clone());
            }
        }

        let mut tx = self.unit_of_work.begin().await?;

        if let Err(e) = self.dispatcher.dispatch(&mut tx, &events).await {
            tracing::warn!(error = %e, "Batch dispatch failed, rolling back");
            if let Err(rb) = tx.rollback().await {
                tracing::error!(error = %rb, "Rollback failed after dispatch error");
            }
            return Err(e);
        }

        let timeout_ms = u64::try_from(self.commit_timeout.as_millis()).unwrap_or(u64::MAX);
        match tokio::time::timeout(self.commit_timeout, tx.commit()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Batch commit failed, batch is redeliverable");
                return Err(e);
            }
            Err(_elapsed) => {
                tracing::warn!(timeout_ms, "Batch commit timed out, batch is redeliverable");
                return Err(ProjectionError::CommitTimeout { timeout_ms });
            }
        }

        // Post-commit hook: runs only after a successful commit.
        if let Some(cache) = &self.cache {
            cache.invalidate(&touched).await;
        }

        tracing::info!(
            received,
            applied = events.len(),
            entities = touched.len(),
            "Batch committed"
        );
        Ok(())
    }
}
