//! The standard lifecycle handler set.
//!
//! Every handler follows the same engine-export contract: the event payload
//! is the full attribute snapshot of the entity at event time, so applying an
//! event replaces the entity's attributes wholesale, advances its status
//! monotonically, and records the event's sequence and timestamp. Terminal
//! events additionally stamp `ended_at`.
//!
//! [`standard_dispatcher`] wires all twelve [`EventKind`]s. Deployments with
//! extra read models register their own handlers on top via
//! [`Dispatcher::builder`].

use flowsight_core::event::{DomainEvent, EventClass, EventKind};
use flowsight_core::projection::{ProjectionEntity, ProjectionError, Result};

use crate::dispatcher::Dispatcher;

/// Apply a lifecycle event to the current entity, creating it if absent.
fn apply_lifecycle(
    current: Option<ProjectionEntity>,
    event: &DomainEvent,
) -> Result<ProjectionEntity> {
    let mut entity = current.unwrap_or_else(|| {
        ProjectionEntity::new(
            event.entity_id.clone(),
            event.kind.entity_type(),
            event.process_instance_id.clone(),
            event.timestamp,
        )
    });

    entity.attributes = event.payload.clone();
    entity.advance_status(event.kind.status());
    entity.last_sequence = event.sequence;
    entity.updated_at = event.timestamp;
    if event.kind.class() == EventClass::Terminal {
        entity.ended_at = Some(event.timestamp);
    }

    Ok(entity)
}

/// Handler for creation events.
///
/// Re-delivered creations (the entity already exists) are applied like any
/// other snapshot; the monotone status and sequence checks make that safe.
pub fn on_created(
    current: Option<ProjectionEntity>,
    event: &DomainEvent,
) -> Result<ProjectionEntity> {
    apply_lifecycle(current, event)
}

/// Handler for snapshot events (started/updated).
pub fn on_snapshot(
    current: Option<ProjectionEntity>,
    event: &DomainEvent,
) -> Result<ProjectionEntity> {
    apply_lifecycle(current, event)
}

/// Handler for task assignment. A `task.assigned` snapshot without an
/// `assignee` attribute is malformed engine output and aborts the batch.
///
/// # Errors
///
/// Returns [`ProjectionError::Handler`] when the payload lacks `assignee`.
pub fn on_task_assigned(
    current: Option<ProjectionEntity>,
    event: &DomainEvent,
) -> Result<ProjectionEntity> {
    if !event.payload.contains_key("assignee") {
        return Err(ProjectionError::Handler {
            event_type: event.kind.as_str().to_string(),
            reason: "task.assigned payload has no assignee".to_string(),
        });
    }
    apply_lifecycle(current, event)
}

/// Handler for terminal events (completed/cancelled).
pub fn on_terminal(
    current: Option<ProjectionEntity>,
    event: &DomainEvent,
) -> Result<ProjectionEntity> {
    apply_lifecycle(current, event)
}

/// Build the dispatcher with the full standard lifecycle registry.
#[must_use]
pub fn standard_dispatcher() -> Dispatcher {
    Dispatcher::builder()
        .handle(EventKind::ProcessCreated, on_created)
        .handle(EventKind::ProcessStarted, on_snapshot)
        .handle(EventKind::ProcessUpdated, on_snapshot)
        .handle(EventKind::ProcessCompleted, on_terminal)
        .handle(EventKind::ProcessCancelled, on_terminal)
        .handle(EventKind::TaskCreated, on_created)
        .handle(EventKind::TaskAssigned, on_task_assigned)
        .handle(EventKind::TaskUpdated, on_snapshot)
        .handle(EventKind::TaskCompleted, on_terminal)
        .handle(EventKind::TaskCancelled, on_terminal)
        .handle(EventKind::VariableCreated, on_created)
        .handle(EventKind::VariableUpdated, on_snapshot)
        .build()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use chrono::Utc;
    use flowsight_core::event::EntityStatus;

    fn event(id: u64, kind: EventKind, entity: &str, seq: u64) -> DomainEvent {
        DomainEvent::new(id, kind, entity, "process-1", seq, Utc::now())
    }

    #[test]
    fn every_kind_is_registered() {
        let dispatcher = standard_dispatcher();
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
            assert!(dispatcher.is_registered(kind), "missing handler for {kind}");
        }
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn terminal_event_closes_entity() {
        let created = on_created(None, &event(1, EventKind::TaskCreated, "t1", 1)).unwrap();
        assert_eq!(created.status, EntityStatus::Created);
        assert!(created.ended_at.is_none());

        let done =
            on_terminal(Some(created), &event(2, EventKind::TaskCompleted, "t1", 2)).unwrap();
        assert_eq!(done.status, EntityStatus::Completed);
        assert!(done.ended_at.is_some());
        assert_eq!(done.last_sequence, 2);
    }

    #[test]
    fn assignment_without_assignee_is_rejected() {
        let err = on_task_assigned(None, &event(1, EventKind::TaskAssigned, "t1", 1));
        assert!(err.is_err());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn snapshot_replaces_attributes_wholesale() {
        let first = event(1, EventKind::VariableCreated, "v1", 1)
            .with_attribute("value", serde_json::json!(1))
            .with_attribute("stale", serde_json::json!(true));
        let second = event(2, EventKind::VariableUpdated, "v1", 2)
            .with_attribute("value", serde_json::json!(2));

        let entity = on_created(None, &first).unwrap();
        let entity = on_snapshot(Some(entity), &second).unwrap();

        assert_eq!(entity.attributes.get("value"), Some(&serde_json::json!(2)));
        assert!(!entity.attributes.contains_key("stale"));
        assert_eq!(entity.status, EntityStatus::Active);
    }
}
