//! # Flowsight Correlation
//!
//! Pairs the two halves of asynchronous message exchanges.
//!
//! Process engines report message exchanges as independent halves: a process
//! announces it is **waiting** for a message, another instance reports the
//! message was **sent**. The halves arrive in any order, on any consumer, any
//! amount of time apart. This crate holds the unmatched halves and emits one
//! consolidated message per completed exchange:
//!
//! - [`CorrelationAggregator`]: the matching logic, one critical section per
//!   correlation key
//! - [`CorrelationService`]: the consumer loop wiring the aggregator to the
//!   event bus topics
//! - [`InMemoryGroupStore`] / [`InProcessLockRegistry`]: single-process
//!   backends (shared-backend deployments use `flowsight-postgres` or
//!   `flowsight-redis`)
//!
//! See `flowsight_core::correlation` for the data model and invariants.

pub mod aggregator;
pub mod memory;
pub mod service;

pub use aggregator::CorrelationAggregator;
pub use memory::{InMemoryGroupStore, InProcessLockRegistry};
pub use service::CorrelationService;
