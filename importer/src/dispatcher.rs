//! Routes events to registered handlers and persists the results.
//!
//! # Registry
//!
//! The dispatcher holds a startup-built map from [`EventKind`] to a handler
//! function. The map is explicit and statically checked — adding an event
//! kind without wiring a handler is visible at the registration site, and no
//! reflection or type-name lookup is involved. New kinds are supported by
//! adding a registration, not by modifying the dispatcher.
//!
//! # Contract
//!
//! For each event, in order:
//!
//! - an unregistered kind is logged and skipped (recoverable, not an error);
//! - the current entity is loaded through the active transaction, created by
//!   the handler if absent;
//! - events whose `sequence` is at or below the entity's `last_sequence` are
//!   skipped (duplicate delivery — idempotency);
//! - the handler returns the updated entity, which is persisted.
//!
//! The first handler error aborts the remaining events and propagates to the
//! batch receiver, rolling back the whole batch.

use flowsight_core::event::{DomainEvent, EventKind};
use flowsight_core::projection::{ProjectionEntity, ProjectionTx, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// A projection handler: takes the current entity (if any) and the event,
/// returns the updated entity to persist.
///
/// Handlers are pure with respect to storage — the dispatcher does the
/// loading and persisting — and must be deterministic.
pub type Handler = Arc<
    dyn Fn(Option<ProjectionEntity>, &DomainEvent) -> Result<ProjectionEntity> + Send + Sync,
>;

/// Builder for a [`Dispatcher`] registry.
#[derive(Default)]
pub struct DispatcherBuilder {
    handlers: HashMap<EventKind, Handler>,
}

impl DispatcherBuilder {
    /// Register a handler for an event kind. A later registration for the
    /// same kind replaces the earlier one.
    #[must_use]
    pub fn handle<F>(mut self, kind: EventKind, handler: F) -> Self
    where
        F: Fn(Option<ProjectionEntity>, &DomainEvent) -> Result<ProjectionEntity>
            + Send
            + Sync
            + 'static,
    {
        self.handlers.insert(kind, Arc::new(handler));
        self
    }

    /// Finish the registry.
    #[must_use]
    pub fn build(self) -> Dispatcher {
        Dispatcher {
            handlers: self.handlers,
        }
    }
}

/// Applies events to the read model via the registered handlers.
pub struct Dispatcher {
    handlers: HashMap<EventKind, Handler>,
}

impl Dispatcher {
    /// Start building a handler registry.
    #[must_use]
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::default()
    }

    /// Whether a handler is registered for `kind`.
    #[must_use]
    pub fn is_registered(&self, kind: EventKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Apply `events` in order through the transaction.
    ///
    /// # Errors
    ///
    /// Propagates the first handler or storage error; remaining events are
    /// not applied and the caller is expected to roll back.
    pub async fn dispatch<T: ProjectionTx>(
        &self,
        tx: &mut T,
        events: &[DomainEvent],
    ) -> Result<()> {
        for event in events {
            let Some(handler) = self.handlers.get(&event.kind) else {
                tracing::warn!(
                    event_type = %event.kind,
                    entity_id = %event.entity_id,
                    "No handler registered for event kind, skipping"
                );
                continue;
            };

            let current = tx.load(&event.entity_id).await?;

            if let Some(entity) = &current {
                if event.sequence <= entity.last_sequence {
                    tracing::debug!(
                        event_type = %event.kind,
                        entity_id = %event.entity_id,
                        sequence = event.sequence,
                        last_sequence = entity.last_sequence,
                        "Event already applied, skipping duplicate"
                    );
                    continue;
                }
            }

            let updated = handler(current, event)?;
            tx.persist(&updated).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use chrono::Utc;
    use flowsight_core::event::{EntityStatus, EntityType};
    use flowsight_core::projection::ProjectionError;
    use flowsight_testing::InMemoryUnitOfWork;
    use flowsight_core::projection::UnitOfWork;

    fn event(id: u64, kind: EventKind, entity: &str, seq: u64) -> DomainEvent {
        DomainEvent::new(id, kind, entity, "process-1", seq, Utc::now())
    }

    fn counting_dispatcher() -> Dispatcher {
        Dispatcher::builder()
            .handle(EventKind::TaskCreated, |current, event| {
                Ok(current.unwrap_or_else(|| {
                    let mut e = ProjectionEntity::new(
                        event.entity_id.clone(),
                        EntityType::Task,
                        event.process_instance_id.clone(),
                        event.timestamp,
                    );
                    e.last_sequence = event.sequence;
                    e
                }))
            })
            .build()
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn unregistered_kind_is_skipped_not_fatal() {
        let uow = InMemoryUnitOfWork::new();
        let dispatcher = counting_dispatcher();
        let mut tx = uow.begin().await.unwrap();

        let events = vec![
            event(1, EventKind::VariableUpdated, "v1", 1), // unregistered
            event(2, EventKind::TaskCreated, "t1", 1),
        ];
        dispatcher.dispatch(&mut tx, &events).await.unwrap();
        tx.commit().await.unwrap();

        assert!(uow.snapshot().contains_key("t1"));
        assert!(!uow.snapshot().contains_key("v1"));
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn stale_sequence_is_skipped() {
        let uow = InMemoryUnitOfWork::new();
        let dispatcher = Dispatcher::builder()
            .handle(EventKind::TaskUpdated, |current, event| {
                let mut entity = current.unwrap_or_else(|| {
                    ProjectionEntity::new(
                        event.entity_id.clone(),
                        EntityType::Task,
                        event.process_instance_id.clone(),
                        event.timestamp,
                    )
                });
                entity.last_sequence = event.sequence;
                entity.advance_status(EntityStatus::Active);
                entity.attributes = event.payload.clone();
                Ok(entity)
            })
            .build();

        let mut tx = uow.begin().await.unwrap();
        let newer = event(2, EventKind::TaskUpdated, "t1", 5)
            .with_attribute("x", serde_json::json!(2));
        let stale = event(1, EventKind::TaskUpdated, "t1", 3)
            .with_attribute("x", serde_json::json!(1));
        dispatcher.dispatch(&mut tx, &[newer, stale]).await.unwrap();
        tx.commit().await.unwrap();

        let entity = uow.snapshot().get("t1").cloned().unwrap();
        assert_eq!(entity.last_sequence, 5);
        assert_eq!(entity.attributes.get("x"), Some(&serde_json::json!(2)));
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn handler_error_aborts_remaining_events() {
        let uow = InMemoryUnitOfWork::new();
        let dispatcher = Dispatcher::builder()
            .handle(EventKind::TaskCreated, |_, event| {
                Err(ProjectionError::Handler {
                    event_type: event.kind.as_str().to_string(),
                    reason: "rejected".to_string(),
                })
            })
            .handle(EventKind::TaskUpdated, |current, event| {
                let mut entity = current.unwrap_or_else(|| {
                    ProjectionEntity::new(
                        event.entity_id.clone(),
                        EntityType::Task,
                        event.process_instance_id.clone(),
                        event.timestamp,
                    )
                });
                entity.last_sequence = event.sequence;
                Ok(entity)
            })
            .build();

        let mut tx = uow.begin().await.unwrap();
        let events = vec![
            event(1, EventKind::TaskCreated, "t1", 1),
            event(2, EventKind::TaskUpdated, "t2", 1),
        ];
        let err = dispatcher.dispatch(&mut tx, &events).await.unwrap_err();
        assert!(matches!(err, ProjectionError::Handler { .. }));
        tx.rollback().await.unwrap();

        // Nothing visible: the failing event aborted before t2 was reached.
        assert!(uow.snapshot().is_empty());
    }
}
