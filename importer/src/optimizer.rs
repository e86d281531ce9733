//! Collapses redundant per-entity event sequences before they reach storage.
//!
//! # Rules
//!
//! Events are grouped by `entity_id`; within each group, in batch order:
//!
//! 1. An event whose `(entity_id, id)` pair already appeared earlier in the
//!    batch is dropped — in-batch duplicate delivery. The dispatcher's
//!    sequence check would no-op it anyway; dropping it here saves the load.
//! 2. A `Snapshot`-class event (`*Started`, `*Updated`, `*Assigned`) is
//!    dropped when a later Snapshot- or Terminal-class event for the same
//!    entity is retained. Lifecycle events carry the full attribute snapshot
//!    of their entity, so the later event fully supersedes the earlier one.
//! 3. `Creation`- and `Terminal`-class events are always retained: creation
//!    pins `created_at`, terminal pins the final status.
//!
//! Relative order of retained events is preserved, events of different
//! entities never affect each other, and a batch with a single event per
//! entity is returned unchanged. Applying the optimized sequence through the
//! dispatcher yields the same final entity state as applying the original —
//! the equivalence property is exercised in the crate's pipeline tests.

use flowsight_core::event::{DomainEvent, EventClass};
use smallvec::SmallVec;
use std::collections::{HashMap, HashSet};

/// Reduces an unordered multi-entity batch to the minimal event set needed to
/// reach the correct final projection state.
#[derive(Clone, Copy, Debug, Default)]
pub struct EventOptimizer;

impl EventOptimizer {
    /// Create a new optimizer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Apply the supersession rules, returning the retained events in their
    /// original relative order.
    #[must_use]
    pub fn optimize(&self, events: Vec<DomainEvent>) -> Vec<DomainEvent> {
        if events.len() < 2 {
            return events;
        }

        let total = events.len();
        let mut keep = vec![true; total];

        let mut by_entity: HashMap<&str, SmallVec<[usize; 4]>> = HashMap::new();
        for (i, event) in events.iter().enumerate() {
            by_entity
                .entry(event.entity_id.as_str())
                .or_default()
                .push(i);
        }

        for indices in by_entity.values() {
            if indices.len() < 2 {
                continue;
            }

            // Rule 1: in-batch duplicates.
            let mut seen_ids: HashSet<u64> = HashSet::with_capacity(indices.len());
            for &i in indices.iter() {
                if !seen_ids.insert(events[i].id) {
                    keep[i] = false;
                }
            }

            // Rules 2 and 3: walk backwards; once a retained snapshot or
            // terminal exists, every earlier snapshot is superseded.
            let mut superseded = false;
            for &i in indices.iter().rev() {
                if !keep[i] {
                    continue;
                }
                match events[i].kind.class() {
                    EventClass::Snapshot => {
                        if superseded {
                            keep[i] = false;
                        } else {
                            superseded = true;
                        }
                    }
                    EventClass::Terminal => superseded = true,
                    EventClass::Creation => {}
                }
            }
        }
        drop(by_entity);

        let optimized: Vec<DomainEvent> = events
            .into_iter()
            .zip(keep)
            .filter_map(|(event, kept)| kept.then_some(event))
            .collect();

        if optimized.len() < total {
            tracing::debug!(
                received = total,
                retained = optimized.len(),
                "Collapsed redundant events in batch"
            );
        }

        optimized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use flowsight_core::event::EventKind;

    fn event(id: u64, kind: EventKind, entity: &str, seq: u64) -> DomainEvent {
        DomainEvent::new(
            id,
            kind,
            entity,
            "process-1",
            seq,
            Utc.timestamp_opt(i64::try_from(seq).unwrap_or(0), 0)
                .single()
                .unwrap_or_default(),
        )
    }

    fn kinds(events: &[DomainEvent]) -> Vec<EventKind> {
        events.iter().map(|e| e.kind).collect()
    }

    #[test]
    fn single_event_per_entity_is_identity() {
        let batch = vec![
            event(1, EventKind::ProcessCreated, "p1", 1),
            event(2, EventKind::TaskCreated, "t1", 1),
            event(3, EventKind::VariableUpdated, "v1", 1),
        ];
        let out = EventOptimizer::new().optimize(batch.clone());
        assert_eq!(out, batch);
    }

    #[test]
    fn later_update_supersedes_earlier_update() {
        let batch = vec![
            event(1, EventKind::ProcessCreated, "p1", 1),
            event(2, EventKind::ProcessUpdated, "p1", 2),
            event(3, EventKind::ProcessUpdated, "p1", 3),
        ];
        let out = EventOptimizer::new().optimize(batch);
        assert_eq!(
            kinds(&out),
            vec![EventKind::ProcessCreated, EventKind::ProcessUpdated]
        );
        assert_eq!(out[1].sequence, 3);
    }

    #[test]
    fn created_then_terminal_keeps_minimal_pair() {
        let batch = vec![
            event(1, EventKind::TaskCreated, "t1", 1),
            event(2, EventKind::TaskUpdated, "t1", 2),
            event(3, EventKind::TaskAssigned, "t1", 3),
            event(4, EventKind::TaskCompleted, "t1", 4),
        ];
        let out = EventOptimizer::new().optimize(batch);
        assert_eq!(
            kinds(&out),
            vec![EventKind::TaskCreated, EventKind::TaskCompleted]
        );
    }

    #[test]
    fn terminal_is_never_dropped() {
        let batch = vec![
            event(1, EventKind::ProcessCompleted, "p1", 5),
            event(2, EventKind::ProcessCancelled, "p1", 6),
        ];
        let out = EventOptimizer::new().optimize(batch.clone());
        assert_eq!(out, batch);
    }

    #[test]
    fn entities_never_affect_each_other() {
        let batch = vec![
            event(1, EventKind::ProcessUpdated, "p1", 2),
            event(2, EventKind::ProcessUpdated, "p2", 2),
        ];
        let out = EventOptimizer::new().optimize(batch.clone());
        assert_eq!(out, batch);
    }

    #[test]
    fn retained_order_is_preserved_across_entities() {
        let batch = vec![
            event(1, EventKind::TaskCreated, "t1", 1),
            event(2, EventKind::ProcessUpdated, "p1", 2),
            event(3, EventKind::TaskUpdated, "t1", 2),
            event(4, EventKind::TaskUpdated, "t1", 3),
        ];
        let out = EventOptimizer::new().optimize(batch);
        let ids: Vec<u64> = out.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 2, 4]);
    }

    #[test]
    fn duplicate_delivery_within_batch_is_dropped() {
        let original = event(9, EventKind::TaskCreated, "t9", 1);
        let batch = vec![original.clone(), original.clone()];
        let out = EventOptimizer::new().optimize(batch);
        assert_eq!(out, vec![original]);
    }

    #[test]
    fn empty_batch_stays_empty() {
        let out = EventOptimizer::new().optimize(Vec::new());
        assert!(out.is_empty());
    }
}
