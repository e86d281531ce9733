//! # Flowsight Core
//!
//! Core types and traits for the Flowsight pipeline.
//!
//! Flowsight ingests lifecycle events exported by distributed process-execution
//! engines and derives two artifacts from the stream:
//!
//! - a consistent, queryable **read model** of process, task and variable state
//!   (the projection side), and
//! - correctly paired asynchronous **message exchanges**, where a "waiting"
//!   partial emitted by one engine instance is matched with the "sent" partial
//!   emitted by another (the correlation side).
//!
//! This crate contains no I/O. It defines:
//!
//! - [`event`]: the closed set of lifecycle event kinds, [`event::DomainEvent`],
//!   ordered [`event::EventBatch`]es and the binary wire envelope
//! - [`event_bus`]: the transport abstraction (at-least-once, ordered per
//!   partition key)
//! - [`projection`]: the read-model record, the transactional persistence seam
//!   and the post-commit read-cache contract
//! - [`correlation`]: message partials, pending groups and the group store
//!   contract
//! - [`lock`]: named exclusive locks with bounded acquisition
//! - [`clock`]: injectable time source
//!
//! ## Delivery model
//!
//! Transports deliver batches **at least once**: a batch may repeat but is
//! never lost. Everything downstream is built for that: the dispatcher skips
//! events whose per-entity sequence has already been applied, and the
//! correlation aggregator consumes each partial exactly once under lock.
//!
//! ## Example
//!
//! ```
//! use flowsight_core::event::{DomainEvent, EventBatch, EventKind};
//! use chrono::Utc;
//!
//! let batch = EventBatch::from(vec![DomainEvent::new(
//!     1,
//!     EventKind::ProcessCreated,
//!     "process-1",
//!     "process-1",
//!     1,
//!     Utc::now(),
//! )]);
//! assert_eq!(batch.len(), 1);
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

pub mod clock;
pub mod correlation;
pub mod event;
pub mod event_bus;
pub mod lock;
pub mod projection;
