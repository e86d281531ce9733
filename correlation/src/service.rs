//! `CorrelationService`: drives the aggregator from the partials topic.
//!
//! # Overview
//!
//! The service subscribes to the partials topic, feeds each decoded
//! [`MessagePartial`] to the [`CorrelationAggregator`], and publishes every
//! resulting [`ConsolidatedMessage`] to the consolidated topic, keyed by
//! correlation key so downstream consumers see matches for one key in order.
//!
//! ```text
//! ┌──────────────────┐
//! │ message-partials │
//! └────────┬─────────┘
//!          │ MessagePartial
//!          ▼
//! ┌────────────────────┐
//! │ CorrelationService │──▶ CorrelationAggregator ──▶ GroupStore
//! └────────┬───────────┘
//!          │ ConsolidatedMessage (on match)
//!          ▼
//! ┌────────────────────┐
//! │ message-correlated │
//! └────────────────────┘
//! ```
//!
//! # Delivery
//!
//! Consumption is at-least-once, and the transport may commit the offset as
//! soon as the envelope is handed over, so retriable failures (store down,
//! lock lost, publish refused) are retried here with a bounded linear
//! backoff before the partial is abandoned with an error log. When a publish
//! fails after the match already mutated the group store, the consumed half
//! is put back via [`CorrelationAggregator::restore`] so the exchange stays
//! matchable on the next attempt or redelivery. Decode failures are not
//! retriable and are dropped with an error log.

use crate::aggregator::CorrelationAggregator;
use flowsight_core::correlation::{
    CorrelationError, GroupStore, MessagePartial, PartialKind, Result,
};
use flowsight_core::event::{Event, SerializedEvent};
use flowsight_core::event_bus::{EventBus, MESSAGE_CORRELATED_TOPIC, MESSAGE_PARTIALS_TOPIC};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Attempts per partial before a retriable failure is abandoned.
const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Backoff after the first failed attempt; grows linearly per attempt.
const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

/// Long-running consumer loop around a [`CorrelationAggregator`].
pub struct CorrelationService<S: GroupStore> {
    aggregator: Arc<CorrelationAggregator<S>>,
    event_bus: Arc<dyn EventBus>,
    max_attempts: u32,
    retry_base_delay: Duration,
    /// Shutdown signal
    shutdown: watch::Receiver<bool>,
}

impl<S: GroupStore> CorrelationService<S> {
    /// Create a service over `aggregator`, consuming and publishing through
    /// `event_bus`.
    ///
    /// Returns the service and a shutdown sender. Send `true` to the sender
    /// to stop the loop gracefully.
    #[must_use]
    pub fn new(
        aggregator: CorrelationAggregator<S>,
        event_bus: Arc<dyn EventBus>,
    ) -> (Self, watch::Sender<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let service = Self {
            aggregator: Arc::new(aggregator),
            event_bus,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
            shutdown: shutdown_rx,
        };

        (service, shutdown_tx)
    }

    /// Set how often a retriable failure is retried and the base backoff
    /// between attempts.
    #[must_use]
    pub const fn with_retry(mut self, max_attempts: u32, base_delay: Duration) -> Self {
        self.max_attempts = max_attempts;
        self.retry_base_delay = base_delay;
        self
    }

    /// Consume partials until a shutdown signal arrives.
    ///
    /// # Errors
    ///
    /// Returns [`CorrelationError::Transport`] if the initial subscription
    /// fails. Per-partial failures are retried, then logged; they do not stop
    /// the loop.
    pub async fn start(&mut self) -> Result<()> {
        tracing::info!(
            topic = MESSAGE_PARTIALS_TOPIC,
            "Starting correlation service"
        );

        let mut stream = self
            .event_bus
            .subscribe(&[MESSAGE_PARTIALS_TOPIC])
            .await
            .map_err(|e| CorrelationError::Transport(e.to_string()))?;

        while !*self.shutdown.borrow() {
            tokio::select! {
                Some(event_result) = stream.next() => {
                    match event_result {
                        Ok(envelope) => {
                            if let Err(e) = self.process_with_retry(&envelope).await {
                                tracing::error!(
                                    error = ?e,
                                    event_type = %envelope.event_type,
                                    "Failed to process partial"
                                );
                            }
                        }
                        Err(e) => {
                            tracing::error!(error = ?e, "Error receiving from partials topic");
                        }
                    }
                }

                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        tracing::info!("Shutdown signal received");
                        break;
                    }
                }
            }
        }

        tracing::info!("Correlation service stopped");
        Ok(())
    }

    /// Process one envelope, retrying retriable failures with linear backoff
    /// up to the configured attempt budget.
    async fn process_with_retry(&self, envelope: &SerializedEvent) -> Result<()> {
        let mut attempt = 1;
        loop {
            match self.process_partial(envelope).await {
                Err(e) if is_retriable(&e) && attempt < self.max_attempts => {
                    tracing::warn!(
                        error = %e,
                        attempt,
                        max_attempts = self.max_attempts,
                        "Retriable correlation failure, backing off"
                    );
                    tokio::time::sleep(self.retry_base_delay * attempt).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    /// Decode one envelope, correlate it, publish the match if one came out.
    ///
    /// If publishing fails after the match mutated the store, the half that
    /// had been pending is restored so a retry or redelivery matches it
    /// again.
    async fn process_partial(&self, envelope: &SerializedEvent) -> Result<()> {
        let partial = MessagePartial::from_bytes(&envelope.data)
            .map_err(|e| CorrelationError::Serialization(e.to_string()))?;
        let incoming_kind = partial.kind;

        let Some(consolidated) = self.aggregator.correlate(partial).await? else {
            return Ok(());
        };

        let outgoing = SerializedEvent::from_event(
            &consolidated,
            Some(consolidated.correlation_key.clone()),
            None,
        )
        .map_err(|e| CorrelationError::Serialization(e.to_string()))?;

        if let Err(publish_error) = self
            .event_bus
            .publish(MESSAGE_CORRELATED_TOPIC, &outgoing)
            .await
        {
            // The incoming half is redelivered by the transport; only the
            // half consumed from the store must go back.
            let stored_half = if incoming_kind == PartialKind::Waiting {
                consolidated.sent
            } else {
                consolidated.waiting
            };
            self.aggregator.restore(stored_half).await?;
            return Err(CorrelationError::Publish(publish_error.to_string()));
        }

        tracing::info!(
            correlation_key = %consolidated.correlation_key,
            "Consolidated message published"
        );
        Ok(())
    }
}

/// Whether a failed correlate/publish can succeed on a later attempt.
const fn is_retriable(error: &CorrelationError) -> bool {
    matches!(
        error,
        CorrelationError::Store(_) | CorrelationError::Lock { .. } | CorrelationError::Publish(_)
    )
}
