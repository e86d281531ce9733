//! Transport abstraction for event batches and message partials.
//!
//! Producers publish serialized values to named topics; consumers subscribe
//! and receive a stream. The transport guarantees **at-least-once** delivery,
//! unordered across partitions but ordered within one partition key — which is
//! why publishers key batches by entity id and partials by correlation key.
//!
//! # Key principles
//!
//! - **At-least-once**: a value may be delivered more than once, never lost.
//! - **Idempotent consumers**: the dispatcher's sequence check and the
//!   aggregator's locked read-modify-write absorb duplicates.
//! - **Ordered per key**: events sharing a partition key keep their order.
//!
//! # Topics
//!
//! The pipeline uses three topics by convention:
//! - `lifecycle-events` — [`crate::event::EventBatch`] input
//! - `message-partials` — [`crate::correlation::MessagePartial`] input
//! - `message-correlated` — [`crate::correlation::ConsolidatedMessage`] output

use crate::event::SerializedEvent;
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during transport operations.
#[derive(Error, Debug, Clone)]
pub enum EventBusError {
    /// Failed to connect to the transport.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish a value to a topic.
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed.
        topic: String,
        /// The reason for failure.
        reason: String,
    },

    /// Failed to subscribe to topics.
    #[error("Subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe.
        topics: Vec<String>,
        /// The reason for failure.
        reason: String,
    },

    /// Failed to deserialize a received value.
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    /// Network or transport-level error.
    #[error("Transport error: {0}")]
    TransportError(String),

    /// Generic error for other failures.
    #[error("Event bus error: {0}")]
    Other(String),
}

/// Stream of serialized events from a subscription.
pub type EventStream =
    Pin<Box<dyn Stream<Item = Result<SerializedEvent, EventBusError>> + Send>>;

/// Publish/subscribe transport for the pipeline.
///
/// Uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn` so the
/// trait stays dyn-compatible (`Arc<dyn EventBus>` is passed into the batch
/// receiver and the correlation service).
///
/// # Examples
///
/// ```rust,ignore
/// use futures::StreamExt;
///
/// let mut stream = bus.subscribe(&["message-partials"]).await?;
/// while let Some(result) = stream.next().await {
///     match result {
///         Ok(envelope) => correlate(&envelope)?,
///         Err(e) => tracing::error!(error = %e, "stream error"),
///     }
/// }
/// ```
pub trait EventBus: Send + Sync {
    /// Publish a serialized value to a topic.
    ///
    /// Delivery is at-least-once; consumers must tolerate duplicates.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::PublishFailed`] if the publish fails.
    fn publish(
        &self,
        topic: &str,
        event: &SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>>;

    /// Subscribe to one or more topics and receive a merged stream.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SubscriptionFailed`] if subscription fails.
    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>>;
}

/// Topic carrying lifecycle event batches.
pub const LIFECYCLE_EVENTS_TOPIC: &str = "lifecycle-events";

/// Topic carrying unmatched message partials.
pub const MESSAGE_PARTIALS_TOPIC: &str = "message-partials";

/// Topic receiving consolidated (matched) messages.
pub const MESSAGE_CORRELATED_TOPIC: &str = "message-correlated";
