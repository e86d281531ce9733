//! # Flowsight Importer
//!
//! The write path of the read model: receives batches of lifecycle events
//! from the transport, collapses redundant events, and applies the remainder
//! to the projection store inside one transaction per batch.
//!
//! ## Pipeline
//!
//! ```text
//! ┌────────────┐   batch    ┌───────────────┐  optimized  ┌────────────┐
//! │ Transport  │ ─────────► │ BatchReceiver │ ──────────► │ Dispatcher │
//! └────────────┘            │  (one UoW)    │             └─────┬──────┘
//!                           └──────┬────────┘                   │ load /
//!                                  │ commit                     │ persist
//!                                  ▼                            ▼
//!                           post-commit cache          ProjectionTx
//!                           invalidation               (projection store)
//! ```
//!
//! - [`optimizer::EventOptimizer`] drops events made redundant by later
//!   events for the same entity, preserving retained order.
//! - [`dispatcher::Dispatcher`] routes each event to the handler registered
//!   for its kind and persists the result; stale sequences are skipped so
//!   at-least-once delivery is idempotent.
//! - [`receiver::BatchReceiver`] is the transactional entry point: one unit
//!   of work per batch, bounded commit deadline, read-cache invalidation only
//!   after commit.
//!
//! ## Example
//!
//! ```ignore
//! use flowsight_importer::{handlers, receiver::BatchReceiver};
//!
//! let receiver = BatchReceiver::new(unit_of_work, handlers::standard_dispatcher())
//!     .with_read_cache(cache);
//! receiver.receive(batch).await?;
//! ```

pub mod dispatcher;
pub mod handlers;
pub mod optimizer;
pub mod receiver;

pub use dispatcher::{Dispatcher, DispatcherBuilder, Handler};
pub use optimizer::EventOptimizer;
pub use receiver::BatchReceiver;
