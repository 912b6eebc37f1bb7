mod common;

use common::{fixed_encoder, init_logging, MockAsyncProducer, MockBroker, MockSyncProducer};
use event_tracker::delivery::SafePolicy;
use event_tracker::event::{Event, EventBase, Metadatable, Timestampable};
use event_tracker::{
    HealthCheck, KafkaTracker, LogTracker, MockTracker, Plain, Tombstone, Tracker, TrackerParts,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Default, Serialize)]
struct TestEvent {
    #[serde(flatten)]
    base: EventBase,
    my_field: String,
}

impl Event for TestEvent {
    fn metadata_mut(&mut self) -> Option<&mut dyn Metadatable> {
        Some(&mut self.base)
    }

    fn timestamp_mut(&mut self) -> Option<&mut dyn Timestampable> {
        Some(&mut self.base)
    }
}

/// Trackers are used through the trait object in applications.
async fn send_all(tracker: &dyn Tracker) {
    tracker.fast_message("test", &mut json!({"hallo": "test"})).unwrap();
    tracker.safe_message("test", &mut "plain text").await.unwrap();
    tracker
        .fast_message_with_key("test", &mut Tombstone, Some(&b"gone"[..]))
        .unwrap();
}

#[tokio::test]
async fn test_mock_tracker_through_trait_object() {
    let mut tracker = MockTracker::with_encoder(fixed_encoder());
    send_all(&tracker).await;

    assert_eq!(
        tracker.get("test", 0).unwrap(),
        br#"{"hallo":"test","ts":"1982-04-03T12:00:00Z"}"#.to_vec()
    );
    assert_eq!(tracker.get("test", 1).unwrap(), b"plain text".to_vec());
    assert!(tracker.get("test", 2).unwrap().is_empty());
    assert_eq!(tracker.get_key("test", 2), Some(b"gone".to_vec()));
    assert!(tracker.check_health().is_ok());

    tracker.close().await.unwrap();
    tracker.close().await.unwrap();
}

#[tokio::test]
async fn test_event_is_enriched() {
    let tracker = MockTracker::with_encoder(fixed_encoder());
    let mut event = TestEvent {
        my_field: "value".to_string(),
        ..Default::default()
    };

    tracker.safe_message("events", &mut event).await.unwrap();

    // The caller's value is enriched in place.
    assert_eq!(event.base.ts, "1982-04-03T12:00:00Z");
    assert_eq!(event.base.metadata.service, "tracker");
    assert!(!event.base.uuid.is_empty());

    let sent: Value = serde_json::from_slice(&tracker.get("events", 0).unwrap()).unwrap();
    assert_eq!(sent["ts"], "1982-04-03T12:00:00Z");
    assert_eq!(sent["service"], "tracker");
    assert_eq!(sent["env"], "development");
    assert_eq!(sent["cluster"], "local");
    assert_eq!(sent["host"], "localhost");
    assert_eq!(sent["release"], "master");
    assert_eq!(sent["my_field"], "value");
    assert_eq!(sent["_uuid"], event.base.uuid.as_str());
}

#[tokio::test]
async fn test_plain_values_are_not_enriched() {
    #[derive(Serialize)]
    struct Reading {
        celsius: f64,
    }

    let tracker = MockTracker::with_encoder(fixed_encoder());
    tracker
        .fast_message("readings", &mut Plain(Reading { celsius: 21.5 }))
        .unwrap();
    tracker.fast_message("readings", &mut json!([1, 2, 3])).unwrap();

    assert_eq!(tracker.get("readings", 0).unwrap(), br#"{"celsius":21.5}"#.to_vec());
    assert_eq!(tracker.get("readings", 1).unwrap(), b"[1,2,3]".to_vec());
}

#[tokio::test]
async fn test_log_tracker_accepts_everything() {
    init_logging();
    let mut tracker = LogTracker::with_encoder("test", fixed_encoder());

    send_all(&tracker).await;
    tracker
        .safe_message_with_key("test", &mut vec![0xffu8, 0x00], Some(&[0x01, 0x02][..]))
        .await
        .unwrap();

    assert!(tracker.check_health().is_ok());
    tracker.close().await.unwrap();
}

#[tokio::test]
async fn test_kafka_tracker_through_trait_object() {
    let broker = MockBroker::new();
    let parts = TrackerParts::new(
        fixed_encoder(),
        Box::new(MockAsyncProducer::new(broker.clone())),
        Arc::new(MockSyncProducer::new(broker.clone())),
        SafePolicy::ProducerRetry,
    )
    .unwrap();
    let mut tracker: Box<dyn Tracker> = Box::new(KafkaTracker::from_parts(parts));

    send_all(tracker.as_ref()).await;
    assert!(tracker.check_health().is_ok());
    tracker.close().await.unwrap();

    let delivered = broker.delivered();
    assert_eq!(delivered.len(), 3);
    assert!(delivered[2].is_tombstone());
    assert_eq!(delivered[2].key.as_deref(), Some(&b"gone"[..]));

    // Everything is released after close.
    assert!(tracker.fast_message("test", &mut "late").is_err());
    assert!(tracker.safe_message("test", &mut "late").await.is_err());
    tracker.close().await.unwrap();
}
