//! Message-exchange partials, pending groups and the group store contract.
//!
//! # Overview
//!
//! A BPMN message exchange spans engine instances that share no memory: one
//! instance reports that a process is **waiting** for a message, another that
//! a message was **sent**. Each report arrives as a [`MessagePartial`] keyed
//! by a correlation key. The aggregator holds unmatched partials in a
//! [`MessageGroup`] inside a [`GroupStore`] and, once both halves are present,
//! emits one [`ConsolidatedMessage`].
//!
//! # Invariants
//!
//! - A group holds at most one Waiting-class partial and any number of
//!   Sent-class partials.
//! - A consumed partial is removed from the group atomically with the match;
//!   no Sent partial ever matches twice.
//! - An empty group is deleted; its key returns to the Empty state.
//!
//! All group mutation happens under a lock held by the caller (see
//! [`crate::lock::LockRegistry`]); the store itself does not lock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use thiserror::Error;

use crate::event::Event;

/// Error type for correlation operations.
#[derive(Debug, Error)]
pub enum CorrelationError {
    /// The group store backend is unavailable or rejected the operation.
    /// Retriable: the caller must not acknowledge the partial's delivery.
    #[error("Group store error: {0}")]
    Store(String),

    /// Lock acquisition failed or timed out. Retriable.
    #[error("Lock error for key '{key}': {reason}")]
    Lock {
        /// The correlation key whose lock failed.
        key: String,
        /// What went wrong.
        reason: String,
    },

    /// Serialization/deserialization of a group or partial failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Publishing the consolidated message failed.
    #[error("Publish error: {0}")]
    Publish(String),

    /// The partial transport failed (subscribe or receive).
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Result type for correlation operations.
pub type Result<T> = std::result::Result<T, CorrelationError>;

/// Which half of a message exchange a partial represents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartialKind {
    /// A process is waiting to receive a message (subscription opened).
    Waiting,
    /// A message was sent toward a waiting process.
    Sent,
    /// A message was received by an intermediary and forwarded.
    Received,
}

impl PartialKind {
    /// Whether this kind belongs to the Sent class.
    ///
    /// `Received` partials pair with a Waiting partial exactly like `Sent`
    /// ones do, so the aggregator treats them as Sent-class.
    #[must_use]
    pub const fn is_sent_class(self) -> bool {
        matches!(self, Self::Sent | Self::Received)
    }

    /// Whether `other` can complete a match with this kind.
    #[must_use]
    pub const fn is_complementary(self, other: Self) -> bool {
        match self {
            Self::Waiting => other.is_sent_class(),
            Self::Sent | Self::Received => matches!(other, Self::Waiting),
        }
    }
}

impl fmt::Display for PartialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Waiting => "waiting",
            Self::Sent => "sent",
            Self::Received => "received",
        };
        f.write_str(s)
    }
}

/// One half of an asynchronous message exchange.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessagePartial {
    /// Which half this is.
    pub kind: PartialKind,
    /// The key linking this partial to its counterpart.
    pub correlation_key: String,
    /// Engine-side timestamp; the match picks the earliest pending one.
    pub timestamp: DateTime<Utc>,
    /// Message payload (flat attribute map).
    pub payload: serde_json::Map<String, serde_json::Value>,
}

impl MessagePartial {
    /// Create a partial with an empty payload.
    #[must_use]
    pub fn new(
        kind: PartialKind,
        correlation_key: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            correlation_key: correlation_key.into(),
            timestamp,
            payload: serde_json::Map::new(),
        }
    }
}

impl Event for MessagePartial {
    fn event_type(&self) -> &'static str {
        "message.partial"
    }
}

/// A pending partial together with its arrival position.
///
/// Arrival positions are assigned from the group's counter and give the FIFO
/// tie-break when several pending partials share a timestamp.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingPartial {
    /// The stored partial.
    pub partial: MessagePartial,
    /// Position in arrival order within this group.
    pub arrival_seq: u64,
}

/// Unmatched partials for one correlation key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageGroup {
    /// The correlation key this group collects partials for.
    pub correlation_key: String,
    /// Pending partials in arrival order.
    pub pending: Vec<PendingPartial>,
    /// Next arrival position to assign.
    pub next_arrival_seq: u64,
    /// When the group was created.
    pub created_at: DateTime<Utc>,
}

impl MessageGroup {
    /// Create an empty group.
    #[must_use]
    pub fn new(correlation_key: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            correlation_key: correlation_key.into(),
            pending: Vec::new(),
            next_arrival_seq: 0,
            created_at,
        }
    }

    /// Append a partial, recording its arrival position.
    pub fn push(&mut self, partial: MessagePartial) {
        let arrival_seq = self.next_arrival_seq;
        self.next_arrival_seq += 1;
        self.pending.push(PendingPartial {
            partial,
            arrival_seq,
        });
    }

    /// Whether no partials are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Index of the pending Waiting-class partial, if one exists.
    #[must_use]
    pub fn waiting_index(&self) -> Option<usize> {
        self.pending
            .iter()
            .position(|p| p.partial.kind == PartialKind::Waiting)
    }

    /// Index of the best pending partial complementary to `kind`:
    /// earliest timestamp, ties broken by arrival order.
    #[must_use]
    pub fn best_complement(&self, kind: PartialKind) -> Option<usize> {
        self.pending
            .iter()
            .enumerate()
            .filter(|(_, p)| kind.is_complementary(p.partial.kind))
            .min_by_key(|(_, p)| (p.partial.timestamp, p.arrival_seq))
            .map(|(i, _)| i)
    }
}

/// A fully correlated message exchange, ready for downstream delivery.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatedMessage {
    /// The key both halves shared.
    pub correlation_key: String,
    /// The waiting half.
    pub waiting: MessagePartial,
    /// The matched sent half (earliest-timestamp pending one).
    pub sent: MessagePartial,
    /// When the aggregator produced the match.
    pub matched_at: DateTime<Utc>,
}

impl Event for ConsolidatedMessage {
    fn event_type(&self) -> &'static str {
        "message.consolidated"
    }
}

/// Key/value persistence for pending correlation state.
///
/// Backends: process-local map, relational table, distributed cache. All
/// honor read-after-write visibility within one process; durability matches
/// the backend (in-memory state does not survive a restart, persistent
/// backends do). Every call happens under a caller-held lock for the same
/// correlation key.
pub trait GroupStore: Send + Sync {
    /// Fetch the group for a correlation key, if present.
    ///
    /// # Errors
    ///
    /// Returns [`CorrelationError::Store`] if the backend is unavailable.
    fn get(
        &self,
        correlation_key: &str,
    ) -> impl Future<Output = Result<Option<MessageGroup>>> + Send;

    /// Insert or replace the group under its correlation key.
    ///
    /// # Errors
    ///
    /// Returns [`CorrelationError::Store`] if the backend is unavailable.
    fn put(&self, group: &MessageGroup) -> impl Future<Output = Result<()>> + Send;

    /// Delete the group for a correlation key. Deleting an absent key is not
    /// an error.
    ///
    /// # Errors
    ///
    /// Returns [`CorrelationError::Store`] if the backend is unavailable.
    fn delete(&self, correlation_key: &str) -> impl Future<Output = Result<()>> + Send;
}
