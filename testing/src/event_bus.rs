//! In-memory transport for tests: per-topic channels plus a published log.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Lock poisoning only happens after a test already failed

use flowsight_core::event::SerializedEvent;
use flowsight_core::event_bus::{EventBus, EventBusError, EventStream};
use futures::StreamExt;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;

/// In-memory event bus: publishes fan out to every live subscription of the
/// topic, and every published event is also appended to an inspectable log.
///
/// Delivery is synchronous within the process (no redelivery, no partitions);
/// it is a functional stand-in for the Redpanda bus in service-loop tests.
///
/// # Example
///
/// ```
/// use flowsight_testing::InMemoryEventBus;
/// use flowsight_core::event::SerializedEvent;
/// use flowsight_core::event_bus::EventBus;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = InMemoryEventBus::new();
/// let event = SerializedEvent::new("test".to_string(), None, vec![1, 2], None);
/// bus.publish("some-topic", &event).await?;
/// assert_eq!(bus.published("some-topic").len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryEventBus {
    subscribers: Arc<RwLock<HashMap<String, Vec<mpsc::UnboundedSender<SerializedEvent>>>>>,
    log: Arc<Mutex<Vec<(String, SerializedEvent)>>>,
}

impl InMemoryEventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Events published to `topic` so far, in publish order.
    #[must_use]
    pub fn published(&self, topic: &str) -> Vec<SerializedEvent> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, e)| e.clone())
            .collect()
    }

    /// Total number of published events across all topics.
    #[must_use]
    pub fn published_count(&self) -> usize {
        self.log.lock().unwrap().len()
    }
}

impl EventBus for InMemoryEventBus {
    fn publish(
        &self,
        topic: &str,
        event: &SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        let topic = topic.to_string();
        let event = event.clone();
        Box::pin(async move {
            self.log
                .lock()
                .unwrap()
                .push((topic.clone(), event.clone()));

            if let Some(senders) = self.subscribers.read().unwrap().get(&topic) {
                for sender in senders {
                    // Dropped receivers are fine; the subscription just ended.
                    let _ = sender.send(event.clone());
                }
            }
            Ok(())
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>> {
        let topics: Vec<String> = topics.iter().map(|s| (*s).to_string()).collect();
        Box::pin(async move {
            let (tx, rx) = mpsc::unbounded_channel();
            {
                let mut subscribers = self.subscribers.write().unwrap();
                for topic in topics {
                    subscribers.entry(topic).or_default().push(tx.clone());
                }
            }

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(event) = rx.recv().await {
                    yield Ok(event);
                }
            };
            Ok(stream.boxed())
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn envelope(tag: &str) -> SerializedEvent {
        SerializedEvent::new(tag.to_string(), None, vec![1], None)
    }

    #[tokio::test]
    async fn subscriber_receives_published_events_in_order() {
        let bus = InMemoryEventBus::new();
        let mut stream = bus.subscribe(&["t"]).await.unwrap();

        bus.publish("t", &envelope("a")).await.unwrap();
        bus.publish("t", &envelope("b")).await.unwrap();

        let first = stream.next().await.unwrap().unwrap();
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(first.event_type, "a");
        assert_eq!(second.event_type, "b");
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        let bus = InMemoryEventBus::new();
        let mut stream = bus.subscribe(&["t1"]).await.unwrap();

        bus.publish("t2", &envelope("other")).await.unwrap();
        bus.publish("t1", &envelope("mine")).await.unwrap();

        let received = stream.next().await.unwrap().unwrap();
        assert_eq!(received.event_type, "mine");
        assert_eq!(bus.published("t2").len(), 1);
    }
}
