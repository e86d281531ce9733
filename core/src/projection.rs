//! The projected read model and its persistence seams.
//!
//! # Overview
//!
//! The projection side turns lifecycle events into [`ProjectionEntity`]
//! records keyed by entity id. Entities are mutated **only** by the projection
//! dispatcher through registered handlers; no other component writes to the
//! projection store.
//!
//! Persistence is transactional. The batch receiver opens a unit of work
//! ([`UnitOfWork::begin`]), the dispatcher loads and persists entities through
//! the resulting [`ProjectionTx`], and the receiver commits (or rolls back)
//! the whole batch. Read caches sitting in front of the store implement
//! [`ReadCache`] and are invalidated only after a successful commit, so
//! queries never observe stale entries mixed with fresh rows.
//!
//! # Idempotency
//!
//! Delivery is at-least-once, so each entity tracks `last_sequence`, the
//! highest per-entity event sequence applied so far. The dispatcher skips any
//! event at or below it; replaying a batch is a no-op.

use crate::event::{EntityStatus, EntityType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Error type for projection operations.
#[derive(Debug, Error)]
pub enum ProjectionError {
    /// Storage backend error.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A registered handler rejected an event. Aborts the whole batch.
    #[error("Handler error for {event_type}: {reason}")]
    Handler {
        /// Wire tag of the offending event.
        event_type: String,
        /// What went wrong.
        reason: String,
    },

    /// The unit-of-work commit did not finish within its deadline.
    #[error("Commit timed out after {timeout_ms} ms")]
    CommitTimeout {
        /// The configured deadline in milliseconds.
        timeout_ms: u64,
    },

    /// Transaction-level failure (begin/commit/rollback).
    #[error("Transaction error: {0}")]
    Transaction(String),
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;

/// The read-model record for one process instance, task or variable.
///
/// Created on the first lifecycle event referencing its id, updated by
/// subsequent events, and logically closed (not deleted) by a terminal event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProjectionEntity {
    /// Identifier of the entity (process instance id, task id, variable id).
    pub entity_id: String,
    /// What kind of entity this row projects.
    pub entity_type: EntityType,
    /// The process instance this entity belongs to.
    pub process_instance_id: String,
    /// Current lifecycle status; transitions are monotone by rank.
    pub status: EntityStatus,
    /// Full attribute snapshot from the most recent applied event.
    pub attributes: serde_json::Map<String, serde_json::Value>,
    /// Highest per-entity event sequence applied so far.
    pub last_sequence: u64,
    /// Timestamp of the event that created the record.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the most recent applied event.
    pub updated_at: DateTime<Utc>,
    /// Timestamp of the terminal event, once one has been applied.
    pub ended_at: Option<DateTime<Utc>>,
}

impl ProjectionEntity {
    /// Create a fresh record in `Created` status.
    #[must_use]
    pub fn new(
        entity_id: impl Into<String>,
        entity_type: EntityType,
        process_instance_id: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            entity_type,
            process_instance_id: process_instance_id.into(),
            status: EntityStatus::Created,
            attributes: serde_json::Map::new(),
            last_sequence: 0,
            created_at,
            updated_at: created_at,
            ended_at: None,
        }
    }

    /// Whether a terminal event has closed this entity.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move the status toward `next`, never down-rank.
    ///
    /// Equal-rank transitions are applied (a later terminal event may replace
    /// `Completed` with `Cancelled`); lower-rank ones are ignored.
    pub fn advance_status(&mut self, next: EntityStatus) {
        if next.rank() >= self.status.rank() {
            self.status = next;
        }
    }
}

/// A transaction scope over the projection store.
///
/// One instance covers one batch: the dispatcher loads and persists entities
/// through it, then the receiver resolves it with exactly one of
/// [`ProjectionTx::commit`] or [`ProjectionTx::rollback`]. Nothing written
/// through an uncommitted transaction is visible to readers.
pub trait ProjectionTx: Send {
    /// Load an entity by id, if present.
    ///
    /// Sees writes made earlier in the same transaction.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the load fails.
    fn load(
        &mut self,
        entity_id: &str,
    ) -> impl Future<Output = Result<Option<ProjectionEntity>>> + Send;

    /// Persist (upsert) an entity.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the write fails.
    fn persist(&mut self, entity: &ProjectionEntity) -> impl Future<Output = Result<()>> + Send;

    /// Commit the transaction, making all writes visible atomically.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Transaction`] if the commit fails; the
    /// batch is then eligible for redelivery.
    fn commit(self) -> impl Future<Output = Result<()>> + Send;

    /// Discard every write made in this transaction.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Transaction`] if the rollback itself fails.
    fn rollback(self) -> impl Future<Output = Result<()>> + Send;
}

/// Factory for projection transactions.
pub trait UnitOfWork: Send + Sync {
    /// The transaction type this unit of work produces.
    type Tx: ProjectionTx;

    /// Open a new transaction.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Transaction`] if a transaction cannot be
    /// started (e.g. the backend is unreachable).
    fn begin(&self) -> impl Future<Output = Result<Self::Tx>> + Send;
}

/// A read cache fronting the projection store.
///
/// Invalidated exclusively by the batch receiver's post-commit hook — never
/// eagerly during the transaction, so a failed batch leaves the cache intact.
///
/// Uses explicit `Pin<Box<dyn Future>>` returns to stay dyn-compatible
/// (`Arc<dyn ReadCache>` is an optional receiver dependency).
pub trait ReadCache: Send + Sync {
    /// Drop cached entries for the given entity ids.
    fn invalidate(
        &self,
        entity_ids: &[String],
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;

    /// Drop every cached entry.
    fn clear(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EntityStatus, EntityType};

    #[test]
    fn status_never_moves_down_rank() {
        let mut entity =
            ProjectionEntity::new("task-1", EntityType::Task, "process-1", Utc::now());
        entity.advance_status(EntityStatus::Active);
        entity.advance_status(EntityStatus::Completed);
        entity.advance_status(EntityStatus::Active);
        assert_eq!(entity.status, EntityStatus::Completed);
    }

    #[test]
    fn terminal_may_replace_terminal() {
        let mut entity =
            ProjectionEntity::new("task-1", EntityType::Task, "process-1", Utc::now());
        entity.advance_status(EntityStatus::Completed);
        entity.advance_status(EntityStatus::Cancelled);
        assert_eq!(entity.status, EntityStatus::Cancelled);
        assert!(entity.is_closed());
    }
}
