//! End-to-end tests for the batch pipeline: optimizer, dispatcher, receiver.

#![allow(clippy::unwrap_used)] // Tests panic on failure by design

use chrono::{DateTime, TimeZone, Utc};
use flowsight_core::event::{DomainEvent, EntityStatus, EventBatch, EventKind};
use flowsight_core::projection::{ProjectionTx, UnitOfWork};
use flowsight_importer::handlers::standard_dispatcher;
use flowsight_importer::EventOptimizer;
use flowsight_testing::InMemoryUnitOfWork;
use proptest::prelude::*;
use std::collections::HashMap;

use flowsight_importer::BatchReceiver;

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).single().unwrap()
}

fn event(id: u64, kind: EventKind, entity: &str, seq: u64) -> DomainEvent {
    let timestamp = at(i64::try_from(id).unwrap_or(0));
    DomainEvent::new(id, kind, entity, "process-1", seq, timestamp)
}

#[tokio::test]
async fn create_and_start_in_one_batch() {
    let uow = InMemoryUnitOfWork::new();
    let receiver = BatchReceiver::new(uow.clone(), standard_dispatcher());

    let batch = EventBatch::from(vec![
        event(1, EventKind::ProcessCreated, "p1", 1)
            .with_attribute("name", serde_json::json!("invoice-flow")),
        event(2, EventKind::ProcessStarted, "p1", 2)
            .with_attribute("name", serde_json::json!("invoice-flow"))
            .with_attribute("started_by", serde_json::json!("scheduler")),
    ]);
    receiver.receive(batch).await.unwrap();

    let entity = uow.get("p1").unwrap();
    assert_eq!(entity.status, EntityStatus::Active);
    assert_eq!(entity.last_sequence, 2);
    assert_eq!(
        entity.attributes.get("started_by"),
        Some(&serde_json::json!("scheduler"))
    );
}

#[tokio::test]
async fn duplicate_creation_in_batch_is_created_once() {
    let uow = InMemoryUnitOfWork::new();
    let receiver = BatchReceiver::new(uow.clone(), standard_dispatcher());

    // The engine exporter occasionally repeats a record inside one batch.
    let batch = EventBatch::from(vec![
        event(1, EventKind::TaskCreated, "t1", 1),
        event(1, EventKind::TaskCreated, "t1", 1),
    ]);
    receiver.receive(batch).await.unwrap();

    let entity = uow.get("t1").unwrap();
    assert_eq!(entity.status, EntityStatus::Created);
    assert_eq!(entity.last_sequence, 1);
    assert_eq!(uow.snapshot().len(), 1);
}

#[tokio::test]
async fn replaying_a_batch_is_a_noop() {
    let uow = InMemoryUnitOfWork::new();
    let receiver = BatchReceiver::new(uow.clone(), standard_dispatcher());

    let batch = EventBatch::from(vec![
        event(1, EventKind::ProcessCreated, "p1", 1),
        event(2, EventKind::ProcessStarted, "p1", 2),
        event(3, EventKind::TaskCreated, "t1", 1),
    ]);

    receiver.receive(batch.clone()).await.unwrap();
    let first_pass = uow.snapshot();

    // At-least-once redelivery of the identical batch.
    receiver.receive(batch).await.unwrap();
    assert_eq!(uow.snapshot(), first_pass);
}

#[tokio::test]
async fn failed_commit_leaves_batch_redeliverable() {
    let uow = InMemoryUnitOfWork::new();
    let receiver = BatchReceiver::new(uow.clone(), standard_dispatcher());

    let batch = EventBatch::from(vec![
        event(1, EventKind::ProcessCreated, "p1", 1),
        event(2, EventKind::ProcessCompleted, "p1", 2),
    ]);

    uow.set_fail_commits(true);
    assert!(receiver.receive(batch.clone()).await.is_err());
    assert!(uow.snapshot().is_empty());

    // Redelivery after the backend recovers.
    uow.set_fail_commits(false);
    receiver.receive(batch).await.unwrap();
    let entity = uow.get("p1").unwrap();
    assert_eq!(entity.status, EntityStatus::Completed);
    assert!(entity.ended_at.is_some());
}

#[tokio::test]
async fn terminal_then_late_snapshot_keeps_entity_closed() {
    let uow = InMemoryUnitOfWork::new();
    let receiver = BatchReceiver::new(uow.clone(), standard_dispatcher());

    // Engine clock skew can order an update after the completion record.
    let batch = EventBatch::from(vec![
        event(1, EventKind::TaskCreated, "t1", 1),
        event(2, EventKind::TaskCompleted, "t1", 2),
        event(3, EventKind::TaskUpdated, "t1", 3),
    ]);
    receiver.receive(batch).await.unwrap();

    let entity = uow.get("t1").unwrap();
    assert_eq!(entity.status, EntityStatus::Completed);
    assert_eq!(entity.last_sequence, 3);
}

// ---------------------------------------------------------------------------
// Optimizer equivalence: applying the optimized batch must produce the same
// final projection state as applying the raw batch.

const PROCESS_KINDS: [EventKind; 5] = [
    EventKind::ProcessCreated,
    EventKind::ProcessStarted,
    EventKind::ProcessUpdated,
    EventKind::ProcessCompleted,
    EventKind::ProcessCancelled,
];

const TASK_KINDS: [EventKind; 5] = [
    EventKind::TaskCreated,
    EventKind::TaskAssigned,
    EventKind::TaskUpdated,
    EventKind::TaskCompleted,
    EventKind::TaskCancelled,
];

const VARIABLE_KINDS: [EventKind; 2] = [EventKind::VariableCreated, EventKind::VariableUpdated];

/// Build a plausible engine batch: per-entity sequences are monotone, every
/// entity's first event is its creation, payloads are full snapshots that
/// differ per event.
fn plausible_batch(choices: Vec<(usize, usize)>) -> Vec<DomainEvent> {
    let entities = ["proc-0", "task-0", "var-0"];
    let mut sequences: HashMap<usize, u64> = HashMap::new();
    let mut events = Vec::with_capacity(choices.len());

    for (i, (entity_idx, kind_choice)) in choices.into_iter().enumerate() {
        let first = !sequences.contains_key(&entity_idx);
        let kind = match entity_idx {
            0 => {
                if first {
                    EventKind::ProcessCreated
                } else {
                    PROCESS_KINDS[kind_choice % PROCESS_KINDS.len()]
                }
            }
            1 => {
                if first {
                    EventKind::TaskCreated
                } else {
                    TASK_KINDS[kind_choice % TASK_KINDS.len()]
                }
            }
            _ => {
                if first {
                    EventKind::VariableCreated
                } else {
                    VARIABLE_KINDS[kind_choice % VARIABLE_KINDS.len()]
                }
            }
        };

        let seq = sequences.entry(entity_idx).or_insert(0);
        *seq += 1;

        let id = u64::try_from(i).unwrap() + 1;
        let mut event = event(id, kind, entities[entity_idx], *seq)
            .with_attribute("snapshot_of", serde_json::json!(id));
        if kind == EventKind::TaskAssigned {
            event = event.with_attribute("assignee", serde_json::json!("worker-1"));
        }
        events.push(event);
    }

    events
}

async fn dispatch_all(events: &[DomainEvent]) -> HashMap<String, flowsight_core::projection::ProjectionEntity> {
    let uow = InMemoryUnitOfWork::new();
    let dispatcher = standard_dispatcher();
    let mut tx = uow.begin().await.unwrap();
    dispatcher.dispatch(&mut tx, events).await.unwrap();
    tx.commit().await.unwrap();
    uow.snapshot()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn optimized_batch_projects_identically(
        choices in prop::collection::vec((0..3usize, 0..5usize), 0..24)
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let (raw_len, optimized_len, from_raw, from_optimized) = runtime.block_on(async {
            let raw = plausible_batch(choices);
            let optimized = EventOptimizer::new().optimize(raw.clone());
            let from_raw = dispatch_all(&raw).await;
            let from_optimized = dispatch_all(&optimized).await;
            (raw.len(), optimized.len(), from_raw, from_optimized)
        });

        prop_assert!(optimized_len <= raw_len);
        prop_assert_eq!(from_raw, from_optimized);
    }
}
