use crate::event::EventMetadata;
use crate::health::DEFAULT_ERROR_RATE_THRESHOLD;
use crate::kafka::client_id;
use crate::metrics::Path;
use serde::{Deserialize, Serialize};
use std::path::{Path as FsPath, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrackerConfig {
    pub kafka: KafkaConfig,
    #[serde(default)]
    pub metadata: EventMetadata,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub health: HealthConfig,
}

/// How many replicas must confirm a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AckLevel {
    None,
    Local,
    All,
}

impl AckLevel {
    /// Value of the librdkafka `acks` setting.
    pub fn as_str(&self) -> &'static str {
        match self {
            AckLevel::None => "0",
            AckLevel::Local => "1",
            AckLevel::All => "all",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KafkaConfig {
    pub brokers: Vec<String>,
    #[serde(default = "default_compression")]
    pub compression: String,
    #[serde(default = "default_fast_acks")]
    pub fast_acks: AckLevel,
    #[serde(default = "default_safe_acks")]
    pub safe_acks: AckLevel,
    #[serde(default = "default_channel_buffer_size")]
    pub channel_buffer_size: usize,
    #[serde(default = "default_linger_ms")]
    pub linger_ms: u32,
    #[serde(default = "default_message_timeout_ms")]
    pub message_timeout_ms: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

/// What the safe path does when the broker cannot be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryPolicy {
    /// Rely on producer retries and return the final error to the caller.
    ProducerRetry,
    /// Persist failed messages to disk and redeliver them in the background.
    #[default]
    DiskQueue,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeliveryConfig {
    #[serde(default)]
    pub policy: DeliveryPolicy,
    #[serde(default = "default_queue_dir")]
    pub queue_dir: PathBuf,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthConfig {
    #[serde(default = "default_error_rate_threshold")]
    pub error_rate_threshold: f64,
}

impl TrackerConfig {
    /// Loads the configuration from a file, overlaid by `TRACKER_*`
    /// environment variables (`TRACKER_KAFKA__BROKERS`, ...).
    pub fn from_file<P: AsRef<FsPath>>(path: P) -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("TRACKER")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("kafka.brokers")
                    .try_parsing(true),
            )
            .build()?;

        settings.try_deserialize()
    }

    /// A configuration with defaults for everything but the brokers.
    pub fn new(brokers: Vec<String>, metadata: EventMetadata) -> Self {
        Self {
            kafka: KafkaConfig::new(brokers),
            metadata,
            delivery: DeliveryConfig::default(),
            health: HealthConfig::default(),
        }
    }

    pub fn client_id(&self, path: Path) -> String {
        client_id(path, &self.metadata)
    }

    /// Directory of the durable retry queue, one per safe client id.
    pub fn queue_path(&self) -> PathBuf {
        self.delivery.queue_dir.join(self.client_id(Path::Safe))
    }
}

impl KafkaConfig {
    pub fn new(brokers: Vec<String>) -> Self {
        Self {
            brokers,
            compression: default_compression(),
            fast_acks: default_fast_acks(),
            safe_acks: default_safe_acks(),
            channel_buffer_size: default_channel_buffer_size(),
            linger_ms: default_linger_ms(),
            message_timeout_ms: default_message_timeout_ms(),
            retries: default_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl DeliveryConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            policy: DeliveryPolicy::default(),
            queue_dir: default_queue_dir(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            error_rate_threshold: default_error_rate_threshold(),
        }
    }
}

fn default_compression() -> String {
    "snappy".to_string()
}

fn default_fast_acks() -> AckLevel {
    AckLevel::None
}

fn default_safe_acks() -> AckLevel {
    AckLevel::Local
}

fn default_channel_buffer_size() -> usize {
    131_072
}

fn default_linger_ms() -> u32 {
    5
}

fn default_message_timeout_ms() -> u64 {
    30_000
}

fn default_retries() -> u32 {
    10
}

fn default_retry_backoff_ms() -> u64 {
    200
}

fn default_queue_dir() -> PathBuf {
    PathBuf::from("cache")
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_error_rate_threshold() -> f64 {
    DEFAULT_ERROR_RATE_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{Builder, NamedTempFile};

    fn toml_file() -> NamedTempFile {
        Builder::new().suffix(".toml").tempfile().unwrap()
    }

    #[test]
    fn test_defaults_from_minimal_file() {
        let mut file = toml_file();
        writeln!(
            file,
            r#"
[kafka]
brokers = ["kafka-1:9092", "kafka-2:9092"]

[metadata]
service = "tracker"
environment = "production"
cluster = "eu1"
host = "box-1"
release = "abc123"
"#
        )
        .unwrap();

        let config = TrackerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.kafka.brokers.len(), 2);
        assert_eq!(config.kafka.compression, "snappy");
        assert_eq!(config.kafka.fast_acks, AckLevel::None);
        assert_eq!(config.kafka.safe_acks, AckLevel::Local);
        assert_eq!(config.kafka.retries, 10);
        assert_eq!(config.kafka.retry_backoff_ms, 200);
        assert_eq!(config.delivery.policy, DeliveryPolicy::DiskQueue);
        assert_eq!(config.delivery.poll_interval(), Duration::from_millis(100));
        assert_eq!(config.health.error_rate_threshold, 0.05);
        assert_eq!(config.metadata.environment, "production");
    }

    #[test]
    fn test_policy_and_acks_parse() {
        let mut file = toml_file();
        writeln!(
            file,
            r#"
[kafka]
brokers = ["localhost:9092"]
safe_acks = "all"

[delivery]
policy = "producer_retry"
poll_interval_ms = 250
"#
        )
        .unwrap();

        let config = TrackerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.kafka.safe_acks.as_str(), "all");
        assert_eq!(config.delivery.policy, DeliveryPolicy::ProducerRetry);
        assert_eq!(config.delivery.poll_interval_ms, 250);
    }

    #[test]
    fn test_queue_path_uses_safe_client_id() {
        let config = TrackerConfig::new(
            vec!["localhost:9092".to_string()],
            EventMetadata::new("svc", "dev", "local", "host", "r1"),
        );
        assert_eq!(
            config.queue_path(),
            PathBuf::from("cache/tracker.safe-dev-local-host-svc")
        );
    }
}
