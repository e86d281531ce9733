//! Integration tests for [`RedpandaEventBus`] against a real Kafka instance.
//!
//! The tests are `#[ignore]`d because they need Docker and take up to a
//! minute each to spin up Kafka. Run them with:
//!
//! ```bash
//! cargo test -p flowsight-redpanda --test integration_tests -- --ignored
//! ```

#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use flowsight_core::correlation::{MessagePartial, PartialKind};
use flowsight_core::event::{DomainEvent, Event, EventBatch, EventKind, SerializedEvent};
use flowsight_core::event_bus::{
    EventBus, EventBusError, LIFECYCLE_EVENTS_TOPIC, MESSAGE_PARTIALS_TOPIC,
};
use flowsight_redpanda::RedpandaEventBus;
use futures::StreamExt;
use std::time::Duration;
use testcontainers::ImageExt;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::kafka::{KAFKA_PORT, Kafka};

fn envelope(event_type: &str, key: Option<&str>, data: Vec<u8>) -> SerializedEvent {
    SerializedEvent::new(
        event_type.to_string(),
        key.map(ToString::to_string),
        data,
        None,
    )
}

fn build_bus(brokers: &str) -> Result<RedpandaEventBus, EventBusError> {
    RedpandaEventBus::builder()
        .brokers(brokers)
        .auto_offset_reset("earliest")
        .build()
}

/// Wait until the broker accepts a publish.
async fn wait_for_kafka_ready(brokers: &str) {
    let max_attempts = 60;
    for attempt in 1..=max_attempts {
        if let Ok(bus) = build_bus(brokers) {
            let warmup = envelope("warmup", None, vec![1]);
            if bus.publish("warmup-topic", &warmup).await.is_ok() {
                tokio::time::sleep(Duration::from_millis(500)).await;
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(
            attempt != max_attempts,
            "Kafka failed to become ready after {max_attempts} attempts"
        );
    }
}

async fn setup_kafka() -> (testcontainers::ContainerAsync<Kafka>, RedpandaEventBus) {
    let kafka = Kafka::default()
        .with_env_var("KAFKA_AUTO_CREATE_TOPICS_ENABLE", "true")
        .start()
        .await
        .expect("Failed to start Kafka container");

    let host = kafka.get_host().await.expect("Failed to get host");
    let port = kafka
        .get_host_port_ipv4(KAFKA_PORT)
        .await
        .expect("Failed to get port");
    let brokers = format!("{host}:{port}");
    wait_for_kafka_ready(&brokers).await;

    let bus = build_bus(&brokers).expect("Failed to create event bus");
    (kafka, bus)
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn batch_roundtrip_over_lifecycle_topic() {
    let (_kafka, bus) = setup_kafka().await;

    // Trigger topic auto-creation, then subscribe before the real publish.
    bus.publish(LIFECYCLE_EVENTS_TOPIC, &envelope("warmup", None, vec![255]))
        .await
        .expect("warmup publish");
    tokio::time::sleep(Duration::from_secs(3)).await;

    let mut stream = bus
        .subscribe(&[LIFECYCLE_EVENTS_TOPIC])
        .await
        .expect("subscribe");
    tokio::time::sleep(Duration::from_secs(2)).await;

    let batch = EventBatch::from(vec![DomainEvent::new(
        1,
        EventKind::ProcessCreated,
        "process-1",
        "process-1",
        1,
        chrono::Utc::now(),
    )]);
    let outgoing = SerializedEvent::from_event(&batch, Some("process-1".to_string()), None)
        .expect("serialize batch");
    bus.publish(LIFECYCLE_EVENTS_TOPIC, &outgoing)
        .await
        .expect("publish batch");

    // Skip the warmup envelope and find the batch.
    let received = tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            let result = stream.next().await.expect("stream ended")
                .expect("stream error");
            if result.event_type == "event.batch" {
                return result;
            }
        }
    })
    .await
    .expect("timed out waiting for batch");

    assert_eq!(received.partition_key.as_deref(), Some("process-1"));
    let decoded = EventBatch::from_bytes(&received.data).expect("decode batch");
    assert_eq!(decoded.len(), 1);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn partials_for_one_key_arrive_in_publish_order() {
    let (_kafka, bus) = setup_kafka().await;

    bus.publish(MESSAGE_PARTIALS_TOPIC, &envelope("warmup", None, vec![255]))
        .await
        .expect("warmup publish");
    tokio::time::sleep(Duration::from_secs(3)).await;

    let mut stream = bus
        .subscribe(&[MESSAGE_PARTIALS_TOPIC])
        .await
        .expect("subscribe");
    tokio::time::sleep(Duration::from_secs(2)).await;

    for kind in [PartialKind::Waiting, PartialKind::Sent] {
        let partial = MessagePartial::new(kind, "order-7", chrono::Utc::now());
        let outgoing = SerializedEvent::from_event(&partial, Some("order-7".to_string()), None)
            .expect("serialize partial");
        bus.publish(MESSAGE_PARTIALS_TOPIC, &outgoing)
            .await
            .expect("publish partial");
    }

    let mut kinds = Vec::new();
    let deadline = tokio::time::timeout(Duration::from_secs(30), async {
        while kinds.len() < 2 {
            let received = stream.next().await.expect("stream ended")
                .expect("stream error");
            if received.event_type == "message.partial" {
                let partial = MessagePartial::from_bytes(&received.data).expect("decode");
                kinds.push(partial.kind);
            }
        }
    })
    .await;
    deadline.expect("timed out waiting for partials");

    // Same partition key, so publish order is preserved.
    assert_eq!(kinds, vec![PartialKind::Waiting, PartialKind::Sent]);
}
