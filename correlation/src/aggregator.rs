//! The correlation aggregator: one partial in, at most one match out.
//!
//! # Overview
//!
//! [`CorrelationAggregator::correlate`] executes the read-modify-write of a
//! pending [`MessageGroup`] as a critical section per correlation key:
//!
//! 1. Acquire the key's lock from the [`LockRegistry`].
//! 2. Load the group (or start a fresh one).
//! 3. If a complementary partial is pending, consume it and emit a
//!    [`ConsolidatedMessage`]; otherwise stash the incoming partial.
//! 4. Re-verify lock ownership, then write the group back (or delete it when
//!    it drained). A lock lost to lease expiry fails the operation before
//!    anything is written.
//!
//! The lock makes the whole sequence atomic with respect to concurrent
//! partials for the same key: no double-create, no double-consume.
//!
//! # Matching policy
//!
//! Among several pending complements the earliest engine timestamp wins;
//! equal timestamps fall back to arrival order. A second Waiting partial for
//! a key that already holds one replaces it (the engine re-announced the
//! subscription; the older announcement is stale).

use flowsight_core::clock::Clock;
use flowsight_core::correlation::{
    ConsolidatedMessage, CorrelationError, GroupStore, MessageGroup, MessagePartial, PartialKind,
    Result,
};
use flowsight_core::lock::{LockGuard, LockRegistry};
use std::sync::Arc;

/// Pairs waiting and sent partials into consolidated messages.
///
/// Generic over the [`GroupStore`] backend; the lock registry and clock are
/// injected as trait objects so deployments and tests can swap them freely.
///
/// # Example
///
/// ```
/// use flowsight_correlation::{CorrelationAggregator, InMemoryGroupStore, InProcessLockRegistry};
/// use flowsight_core::clock::SystemClock;
/// use flowsight_core::correlation::{MessagePartial, PartialKind};
/// use std::sync::Arc;
/// use chrono::Utc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let aggregator = CorrelationAggregator::new(
///     InMemoryGroupStore::new(),
///     Arc::new(InProcessLockRegistry::new()),
///     Arc::new(SystemClock),
/// );
///
/// let waiting = MessagePartial::new(PartialKind::Waiting, "order-7", Utc::now());
/// assert!(aggregator.correlate(waiting).await?.is_none());
///
/// let sent = MessagePartial::new(PartialKind::Sent, "order-7", Utc::now());
/// assert!(aggregator.correlate(sent).await?.is_some());
/// # Ok(())
/// # }
/// ```
pub struct CorrelationAggregator<S: GroupStore> {
    store: S,
    locks: Arc<dyn LockRegistry>,
    clock: Arc<dyn Clock>,
}

impl<S: GroupStore> CorrelationAggregator<S> {
    /// Create an aggregator over `store`, locking through `locks`.
    #[must_use]
    pub fn new(store: S, locks: Arc<dyn LockRegistry>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            locks,
            clock,
        }
    }

    /// Feed one partial in; get the consolidated exchange out if this partial
    /// completed one.
    ///
    /// Returns `Ok(None)` when the partial was stashed to wait for its
    /// counterpart. On any error the store was either untouched or left with
    /// the partial not yet recorded, so the caller must treat the delivery as
    /// unacknowledged and let the transport redeliver.
    ///
    /// # Errors
    ///
    /// Returns [`CorrelationError::Lock`] if the key's lock cannot be
    /// acquired, or [`CorrelationError::Store`] if the backend fails.
    pub async fn correlate(&self, partial: MessagePartial) -> Result<Option<ConsolidatedMessage>> {
        let key = partial.correlation_key.clone();

        let mut guard = self
            .locks
            .lock(&key)
            .await
            .map_err(|e| CorrelationError::Lock {
                key: key.clone(),
                reason: e.to_string(),
            })?;

        let mut group = match self.store.get(&key).await? {
            Some(group) => group,
            None => MessageGroup::new(&key, self.clock.now()),
        };

        if let Some(index) = group.best_complement(partial.kind) {
            let matched = group.pending.remove(index).partial;
            let (waiting, sent) = if partial.kind == PartialKind::Waiting {
                (partial, matched)
            } else {
                (matched, partial)
            };

            Self::confirm_lock(guard.as_mut(), &key).await?;
            if group.is_empty() {
                self.store.delete(&key).await?;
            } else {
                self.store.put(&group).await?;
            }

            metrics::counter!("correlation.matched").increment(1);
            tracing::info!(
                correlation_key = %key,
                remaining = group.pending.len(),
                "Partials matched"
            );

            return Ok(Some(ConsolidatedMessage {
                correlation_key: key,
                waiting,
                sent,
                matched_at: self.clock.now(),
            }));
        }

        // No counterpart yet: stash. A duplicate Waiting supersedes the one
        // already pending.
        if partial.kind == PartialKind::Waiting {
            if let Some(index) = group.waiting_index() {
                tracing::warn!(
                    correlation_key = %key,
                    "Replacing stale waiting partial with re-announced one"
                );
                group.pending.remove(index);
            }
        }
        group.push(partial);
        Self::confirm_lock(guard.as_mut(), &key).await?;
        self.store.put(&group).await?;

        metrics::counter!("correlation.stashed").increment(1);
        tracing::debug!(
            correlation_key = %key,
            pending = group.pending.len(),
            "Partial stashed, waiting for counterpart"
        );
        Ok(None)
    }

    /// Return a consumed partial to its pending group.
    ///
    /// Used when a step downstream of a match fails after the group mutation
    /// already committed (the consolidated message could not be published):
    /// the half that had been pending is re-stashed so the redelivered
    /// counterpart finds it again. A Waiting partial is only restored when no
    /// newer Waiting announcement arrived in the meantime.
    ///
    /// # Errors
    ///
    /// Returns [`CorrelationError::Lock`] if the key's lock cannot be
    /// acquired or was lost, or [`CorrelationError::Store`] if the backend
    /// fails.
    pub async fn restore(&self, partial: MessagePartial) -> Result<()> {
        let key = partial.correlation_key.clone();

        let mut guard = self
            .locks
            .lock(&key)
            .await
            .map_err(|e| CorrelationError::Lock {
                key: key.clone(),
                reason: e.to_string(),
            })?;

        let mut group = match self.store.get(&key).await? {
            Some(group) => group,
            None => MessageGroup::new(&key, self.clock.now()),
        };

        if partial.kind == PartialKind::Waiting && group.waiting_index().is_some() {
            tracing::warn!(
                correlation_key = %key,
                "Not restoring consumed waiting partial; a newer one is pending"
            );
            return Ok(());
        }

        group.push(partial);
        Self::confirm_lock(guard.as_mut(), &key).await?;
        self.store.put(&group).await?;

        tracing::info!(correlation_key = %key, "Consumed partial returned to its group");
        Ok(())
    }

    /// Peek at the pending group for a key without locking.
    ///
    /// Read-only operational inspection; the snapshot may be stale by the
    /// time the caller looks at it.
    ///
    /// # Errors
    ///
    /// Returns [`CorrelationError::Store`] if the backend fails.
    pub async fn pending_group(&self, correlation_key: &str) -> Result<Option<MessageGroup>> {
        self.store.get(correlation_key).await
    }

    /// Confirm the guard still holds its lock before the store mutation.
    /// A lease-based backend may have force-released it mid-section.
    async fn confirm_lock(guard: &mut dyn LockGuard, key: &str) -> Result<()> {
        guard.verify().await.map_err(|e| CorrelationError::Lock {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }
}
