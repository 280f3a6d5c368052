use std::time::Duration;

use envconfig::Envconfig;
use tracing::Level;

#[derive(Envconfig)]
pub struct Config {
    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    #[envconfig(from = "LOG_LEVEL", default = "info")]
    pub log_level: Level,

    #[envconfig(from = "METRICS_PORT", default = "9090")]
    pub metrics_port: u16,

    // Synthetic messages published once at startup, before lag checks begin
    #[envconfig(from = "PRODUCE_COUNT", default = "0")]
    pub produce_count: u32,

    #[envconfig(from = "CHECK_INTERVAL_MS", default = "20000")]
    pub lag_check_interval_ms: u64,

    // 0 keeps checking until the process is signalled
    #[envconfig(from = "LAG_CHECKS", default = "0")]
    pub lag_checks: u32,
}

impl Config {
    pub fn lag_check_interval(&self) -> Duration {
        Duration::from_millis(self.lag_check_interval_ms)
    }

    pub fn bind(&self) -> String {
        format!("0.0.0.0:{}", self.metrics_port)
    }
}

/// Connection settings for one probe. Moved into [`crate::KafkaProbe`] on start and only
/// handed out by reference afterwards.
#[derive(Envconfig, Clone, Debug)]
pub struct KafkaConfig {
    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,

    pub kafka_topic: String,

    pub kafka_consumer_group: String,

    #[envconfig(default = "0")]
    pub kafka_partition: i32, // Partition used by the single-partition offset operations

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    #[envconfig(default = "20")]
    pub kafka_producer_linger_ms: u32, // Maximum time between producer batches during low traffic

    #[envconfig(default = "400")]
    pub kafka_producer_queue_mib: u32, // Size of the in-memory producer queue in mebibytes

    #[envconfig(default = "10000000")]
    pub kafka_producer_queue_messages: u32, // Maximum number of messages in the in-memory producer queue

    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32, // Time before we stop retrying producing a message: 20 seconds

    #[envconfig(default = "none")]
    pub kafka_compression_codec: String, // none, gzip, snappy, lz4, zstd

    #[envconfig(default = "10000")]
    pub kafka_query_timeout_ms: u64, // Metadata and offset queries, and the flush on close
}

impl KafkaConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.kafka_query_timeout_ms)
    }

    pub fn message_timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.kafka_message_timeout_ms))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn kafka_config_defaults() {
        let env = HashMap::from([
            ("KAFKA_TOPIC".to_string(), "load_test".to_string()),
            ("KAFKA_CONSUMER_GROUP".to_string(), "load_test_group".to_string()),
        ]);
        let config = KafkaConfig::init_from_hashmap(&env).expect("failed to load config");

        assert_eq!(config.kafka_hosts, "localhost:9092");
        assert_eq!(config.kafka_partition, 0);
        assert!(!config.kafka_tls);
        assert_eq!(config.query_timeout(), Duration::from_secs(10));
        assert_eq!(config.message_timeout(), Duration::from_secs(20));
    }

    #[test]
    fn kafka_config_requires_topic_and_group() {
        let env = HashMap::from([("KAFKA_TOPIC".to_string(), "load_test".to_string())]);
        assert!(KafkaConfig::init_from_hashmap(&env).is_err());
    }

    #[test]
    fn nested_config_reads_driver_settings() {
        let env = HashMap::from([
            ("KAFKA_HOSTS".to_string(), "b:9092".to_string()),
            ("KAFKA_TOPIC".to_string(), "t".to_string()),
            ("KAFKA_CONSUMER_GROUP".to_string(), "g".to_string()),
            ("LOG_LEVEL".to_string(), "debug".to_string()),
            ("PRODUCE_COUNT".to_string(), "500".to_string()),
            ("CHECK_INTERVAL_MS".to_string(), "1000".to_string()),
        ]);
        let config = Config::init_from_hashmap(&env).expect("failed to load config");

        assert_eq!(config.kafka.kafka_hosts, "b:9092");
        assert_eq!(config.log_level, Level::DEBUG);
        assert_eq!(config.produce_count, 500);
        assert_eq!(config.lag_check_interval(), Duration::from_secs(1));
        assert_eq!(config.lag_checks, 0);
        assert_eq!(config.bind(), "0.0.0.0:9090");
    }
}
