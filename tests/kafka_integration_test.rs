mod common;

use common::{init_logging, test_brokers, test_metadata};
use event_tracker::config::DeliveryPolicy;
use event_tracker::metrics::Path;
use event_tracker::{HealthCheck, KafkaTracker, Tracker, TrackerConfig};
use serde_json::json;
use tempfile::TempDir;

fn test_config(queue_dir: &std::path::Path) -> TrackerConfig {
    let mut config = TrackerConfig::new(test_brokers(), test_metadata());
    config.kafka.compression = "none".to_string();
    config.kafka.linger_ms = 0;
    config.kafka.message_timeout_ms = 5000;
    config.delivery.queue_dir = queue_dir.to_path_buf();
    config
}

#[tokio::test]
#[ignore] // Requires running Kafka, set TEST_KAFKA_BROKERS
async fn test_send_both_paths() {
    init_logging();
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path());

    let mut tracker = KafkaTracker::connect(&config).await.unwrap();
    let topic = format!("tracker_test_{}", std::process::id());

    tracker.fast_message(&topic, &mut json!({"hallo": "fast"})).unwrap();
    tracker
        .safe_message_with_key(&topic, &mut json!({"hallo": "safe"}), Some(&b"k"[..]))
        .await
        .unwrap();

    assert_eq!(tracker.metrics().errors(Path::Safe), 0);
    assert!(tracker.check_health().is_ok());
    tracker.close().await.unwrap();
}

#[tokio::test]
#[ignore] // Requires running Kafka, set TEST_KAFKA_BROKERS
async fn test_producer_retry_policy() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = test_config(temp_dir.path());
    config.delivery.policy = DeliveryPolicy::ProducerRetry;

    let mut tracker = KafkaTracker::connect(&config).await.unwrap();
    assert_eq!(tracker.worker_state(), None);

    let topic = format!("tracker_test_{}", std::process::id());
    tracker.safe_message(&topic, &mut "text").await.unwrap();
    tracker.close().await.unwrap();
}
