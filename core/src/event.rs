//! Lifecycle events exported by process-execution engines.
//!
//! Engines export one record per entity state change: a process instance was
//! created, a task was assigned, a variable was updated, and so on. Each
//! record carries the **full attribute snapshot** of its entity at the time of
//! the change. That contract matters: it is what allows the optimizer to drop
//! an intermediate snapshot event when a later one for the same entity is
//! already in the batch.
//!
//! # Design
//!
//! Event kinds form a closed tagged union ([`EventKind`]) rather than an open
//! string registry, so handler dispatch is statically checked and adding a
//! kind is a compile-visible change. Events are serialized with `bincode` for
//! compact storage and fast encode/decode across all-Rust services.
//!
//! # Example
//!
//! ```
//! use flowsight_core::event::{DomainEvent, EventKind, Event};
//! use chrono::Utc;
//!
//! let event = DomainEvent::new(42, EventKind::TaskCreated, "task-9", "process-1", 1, Utc::now());
//! assert_eq!(event.kind.as_str(), "task.created");
//! let bytes = event.to_bytes().expect("serialization should succeed");
//! assert!(!bytes.is_empty());
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fmt;
use thiserror::Error;

/// Error types for event serialization.
#[derive(Error, Debug)]
pub enum EventError {
    /// Failed to serialize an event to bytes.
    #[error("Failed to serialize event: {0}")]
    SerializationError(String),

    /// Failed to deserialize an event from bytes.
    #[error("Failed to deserialize event: {0}")]
    DeserializationError(String),

    /// Unknown event type encountered on the wire.
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),
}

/// The kind of read-model entity an event refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    /// A process instance.
    Process,
    /// A user/service task within a process instance.
    Task,
    /// A process variable.
    Variable,
}

/// Lifecycle status of a projected entity.
///
/// Statuses form a small lattice ordered by [`EntityStatus::rank`]:
/// `Created < Active < (Completed | Cancelled)`. Handlers never move an
/// entity down-rank, which makes duplicate and optimized deliveries converge
/// to the same final state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityStatus {
    /// The entity exists but has not started executing.
    Created,
    /// The entity is live (started, assigned, or being updated).
    Active,
    /// Terminal: the entity finished normally.
    Completed,
    /// Terminal: the entity was cancelled.
    Cancelled,
}

impl EntityStatus {
    /// Position of this status in the lifecycle lattice.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Created => 0,
            Self::Active => 1,
            Self::Completed | Self::Cancelled => 2,
        }
    }

    /// Whether this status closes the entity's lifecycle.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        self.rank() == 2
    }
}

/// Optimization class of an event kind.
///
/// The optimizer reasons about classes, not individual kinds:
///
/// - `Creation` events establish the record (and its `created_at`); they are
///   always retained.
/// - `Snapshot` events carry a full replacement state; a snapshot is
///   redundant when a later snapshot or terminal event for the same entity is
///   already in the batch.
/// - `Terminal` events close the lifecycle; they are never dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventClass {
    /// First lifecycle event for an entity.
    Creation,
    /// Intermediate full-state event (started/updated/assigned).
    Snapshot,
    /// Lifecycle-closing event (completed/cancelled).
    Terminal,
}

/// The closed set of lifecycle event kinds exported by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// A process instance was created.
    ProcessCreated,
    /// A process instance began executing.
    ProcessStarted,
    /// A process instance's state was updated.
    ProcessUpdated,
    /// A process instance finished normally.
    ProcessCompleted,
    /// A process instance was cancelled.
    ProcessCancelled,
    /// A task was created.
    TaskCreated,
    /// A task was assigned to a worker.
    TaskAssigned,
    /// A task's state was updated.
    TaskUpdated,
    /// A task finished normally.
    TaskCompleted,
    /// A task was cancelled.
    TaskCancelled,
    /// A variable was created.
    VariableCreated,
    /// A variable's value was updated.
    VariableUpdated,
}

impl EventKind {
    /// Stable wire tag for this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ProcessCreated => "process.created",
            Self::ProcessStarted => "process.started",
            Self::ProcessUpdated => "process.updated",
            Self::ProcessCompleted => "process.completed",
            Self::ProcessCancelled => "process.cancelled",
            Self::TaskCreated => "task.created",
            Self::TaskAssigned => "task.assigned",
            Self::TaskUpdated => "task.updated",
            Self::TaskCompleted => "task.completed",
            Self::TaskCancelled => "task.cancelled",
            Self::VariableCreated => "variable.created",
            Self::VariableUpdated => "variable.updated",
        }
    }

    /// The entity type this kind refers to.
    #[must_use]
    pub const fn entity_type(self) -> EntityType {
        match self {
            Self::ProcessCreated
            | Self::ProcessStarted
            | Self::ProcessUpdated
            | Self::ProcessCompleted
            | Self::ProcessCancelled => EntityType::Process,
            Self::TaskCreated
            | Self::TaskAssigned
            | Self::TaskUpdated
            | Self::TaskCompleted
            | Self::TaskCancelled => EntityType::Task,
            Self::VariableCreated | Self::VariableUpdated => EntityType::Variable,
        }
    }

    /// The optimization class of this kind.
    #[must_use]
    pub const fn class(self) -> EventClass {
        match self {
            Self::ProcessCreated | Self::TaskCreated | Self::VariableCreated => {
                EventClass::Creation
            }
            Self::ProcessStarted
            | Self::ProcessUpdated
            | Self::TaskAssigned
            | Self::TaskUpdated
            | Self::VariableUpdated => EventClass::Snapshot,
            Self::ProcessCompleted
            | Self::ProcessCancelled
            | Self::TaskCompleted
            | Self::TaskCancelled => EventClass::Terminal,
        }
    }

    /// The status this kind drives its entity toward.
    #[must_use]
    pub const fn status(self) -> EntityStatus {
        match self {
            Self::ProcessCreated | Self::TaskCreated | Self::VariableCreated => {
                EntityStatus::Created
            }
            Self::ProcessStarted
            | Self::ProcessUpdated
            | Self::TaskAssigned
            | Self::TaskUpdated
            | Self::VariableUpdated => EntityStatus::Active,
            Self::ProcessCompleted | Self::TaskCompleted => EntityStatus::Completed,
            Self::ProcessCancelled | Self::TaskCancelled => EntityStatus::Cancelled,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One lifecycle event exported by the engine. Immutable once published.
///
/// `sequence` is the engine's monotonically increasing per-entity position.
/// The dispatcher uses it to make at-least-once delivery idempotent: an event
/// whose sequence is at or below the entity's `last_sequence` has already been
/// applied and is skipped.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    /// Globally unique record id assigned by the engine.
    pub id: u64,
    /// The lifecycle event kind.
    pub kind: EventKind,
    /// Identifier of the entity this event mutates.
    pub entity_id: String,
    /// The process instance this entity belongs to.
    pub process_instance_id: String,
    /// Monotonically increasing position within the entity's event stream.
    pub sequence: u64,
    /// Engine-side timestamp of the state change.
    pub timestamp: DateTime<Utc>,
    /// Full attribute snapshot of the entity at event time (flat map).
    pub payload: serde_json::Map<String, serde_json::Value>,
}

impl DomainEvent {
    /// Create an event with an empty payload.
    #[must_use]
    pub fn new(
        id: u64,
        kind: EventKind,
        entity_id: impl Into<String>,
        process_instance_id: impl Into<String>,
        sequence: u64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            kind,
            entity_id: entity_id.into(),
            process_instance_id: process_instance_id.into(),
            sequence,
            timestamp,
            payload: serde_json::Map::new(),
        }
    }

    /// Attach a payload attribute, builder style.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }
}

/// An ordered sequence of [`DomainEvent`]s sharing one transport delivery unit.
///
/// Order within a batch is significant and is preserved end to end: the
/// optimizer never reorders retained events and the dispatcher applies them
/// in optimizer output order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EventBatch {
    events: Vec<DomainEvent>,
}

impl EventBatch {
    /// Create an empty batch.
    #[must_use]
    pub const fn new() -> Self {
        Self { events: Vec::new() }
    }

    /// Number of events in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the batch carries no events. Empty batches are a no-op for the
    /// receiver, not an error.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Iterate the events in delivery order.
    pub fn iter(&self) -> std::slice::Iter<'_, DomainEvent> {
        self.events.iter()
    }

    /// Consume the batch, yielding its events in delivery order.
    #[must_use]
    pub fn into_events(self) -> Vec<DomainEvent> {
        self.events
    }
}

impl From<Vec<DomainEvent>> for EventBatch {
    fn from(events: Vec<DomainEvent>) -> Self {
        Self { events }
    }
}

impl<'a> IntoIterator for &'a EventBatch {
    type Item = &'a DomainEvent;
    type IntoIter = std::slice::Iter<'a, DomainEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}

/// A value that can travel over the event transport.
///
/// Implementors provide a stable type tag; serialization defaults to bincode
/// for any `Serialize`/`DeserializeOwned` type.
pub trait Event: Send + Sync + 'static {
    /// Stable wire tag for this value (e.g. `"process.created"`).
    fn event_type(&self) -> &'static str;

    /// Serialize this value to bincode bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::SerializationError`] if encoding fails.
    fn to_bytes(&self) -> Result<Vec<u8>, EventError>
    where
        Self: Serialize,
    {
        bincode::serialize(self).map_err(|e| EventError::SerializationError(e.to_string()))
    }

    /// Deserialize a value from bincode bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::DeserializationError`] if the bytes are corrupt
    /// or encode a different type.
    fn from_bytes(bytes: &[u8]) -> Result<Self, EventError>
    where
        Self: DeserializeOwned + Sized,
    {
        bincode::deserialize(bytes).map_err(|e| EventError::DeserializationError(e.to_string()))
    }
}

impl Event for DomainEvent {
    fn event_type(&self) -> &'static str {
        self.kind.as_str()
    }
}

impl Event for EventBatch {
    fn event_type(&self) -> &'static str {
        "event.batch"
    }
}

/// A serialized event ready for the transport.
///
/// `partition_key` selects the transport partition. Publishers set it to the
/// entity id (batches) or correlation key (partials) so that ordering within
/// one logical key is guaranteed by the transport.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SerializedEvent {
    /// The wire tag (e.g. `"event.batch"`, `"message.partial"`).
    pub event_type: String,

    /// Partitioning key; events sharing a key stay ordered on the transport.
    pub partition_key: Option<String>,

    /// The bincode-serialized value.
    pub data: Vec<u8>,

    /// Optional metadata (producer instance, trace ids).
    pub metadata: Option<serde_json::Value>,
}

impl SerializedEvent {
    /// Create a new serialized event.
    #[must_use]
    pub const fn new(
        event_type: String,
        partition_key: Option<String>,
        data: Vec<u8>,
        metadata: Option<serde_json::Value>,
    ) -> Self {
        Self {
            event_type,
            partition_key,
            data,
            metadata,
        }
    }

    /// Serialize an [`Event`] into a transport envelope.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::SerializationError`] if encoding fails.
    pub fn from_event<E: Event + Serialize>(
        event: &E,
        partition_key: Option<String>,
        metadata: Option<serde_json::Value>,
    ) -> Result<Self, EventError> {
        Ok(Self {
            event_type: event.event_type().to_string(),
            partition_key,
            data: event.to_bytes()?,
            metadata,
        })
    }
}

impl fmt::Display for SerializedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SerializedEvent {{ type: {}, size: {} bytes }}",
            self.event_type,
            self.data.len()
        )
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use super::*;

    #[test]
    fn kind_metadata_is_consistent() {
        for kind in [
            EventKind::ProcessCreated,
            EventKind::ProcessStarted,
            EventKind::ProcessUpdated,
            EventKind::ProcessCompleted,
            EventKind::ProcessCancelled,
            EventKind::TaskCreated,
            EventKind::TaskAssigned,
            EventKind::TaskUpdated,
            EventKind::TaskCompleted,
            EventKind::TaskCancelled,
            EventKind::VariableCreated,
            EventKind::VariableUpdated,
        ] {
            match kind.class() {
                EventClass::Creation => assert_eq!(kind.status(), EntityStatus::Created),
                EventClass::Snapshot => assert_eq!(kind.status(), EntityStatus::Active),
                EventClass::Terminal => assert!(kind.status().is_terminal()),
            }
        }
    }

    #[test]
    fn status_ranks_are_monotone() {
        assert!(EntityStatus::Created.rank() < EntityStatus::Active.rank());
        assert!(EntityStatus::Active.rank() < EntityStatus::Completed.rank());
        assert_eq!(
            EntityStatus::Completed.rank(),
            EntityStatus::Cancelled.rank()
        );
    }

    #[test]
    #[allow(clippy::expect_used)] // Panics: Test will fail if serialization fails
    fn event_serialization_roundtrip() {
        let event = DomainEvent::new(
            7,
            EventKind::TaskAssigned,
            "task-1",
            "process-1",
            3,
            Utc::now(),
        )
        .with_attribute("assignee", serde_json::json!("worker-12"));

        let bytes = event.to_bytes().expect("serialization should succeed");
        let decoded =
            DomainEvent::from_bytes(&bytes).expect("deserialization should succeed");
        assert_eq!(event, decoded);
    }

    #[test]
    #[allow(clippy::expect_used)] // Panics: Test will fail if serialization fails
    fn serialized_event_from_event_keys_by_entity() {
        let event = DomainEvent::new(
            1,
            EventKind::ProcessCreated,
            "process-1",
            "process-1",
            1,
            Utc::now(),
        );
        let serialized = SerializedEvent::from_event(
            &event,
            Some(event.entity_id.clone()),
            None,
        )
        .expect("serialization should succeed");

        assert_eq!(serialized.event_type, "process.created");
        assert_eq!(serialized.partition_key.as_deref(), Some("process-1"));
        assert!(!serialized.data.is_empty());
    }

    #[test]
    fn empty_batch_is_empty() {
        let batch = EventBatch::new();
        assert!(batch.is_empty());
        assert_eq!(batch.len(), 0);
    }
}
