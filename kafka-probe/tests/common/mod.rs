#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Once;
use std::time::Duration;

use anyhow::bail;
use once_cell::sync::Lazy;
use rdkafka::consumer::{BaseConsumer, CommitMode, Consumer};
use rdkafka::message::Headers;
use rdkafka::mocking::MockCluster;
use rdkafka::producer::DefaultProducerContext;
use rdkafka::util::Timeout;
use rdkafka::{ClientConfig, Message as _, Offset, TopicPartitionList};
use uuid::Uuid;

use kafka_probe::{KafkaConfig, KafkaProbe, Message};

pub static DEFAULT_CONFIG: Lazy<KafkaConfig> = Lazy::new(|| KafkaConfig {
    kafka_hosts: "kafka:9092".to_string(),
    kafka_topic: "load_test".to_string(),
    kafka_consumer_group: "load_test_group".to_string(),
    kafka_partition: 0,
    kafka_tls: false,
    kafka_producer_linger_ms: 0, // Send messages as soon as possible
    kafka_producer_queue_mib: 50,
    kafka_producer_queue_messages: 1000,
    kafka_message_timeout_ms: 5000,
    kafka_compression_codec: "none".to_string(),
    kafka_query_timeout_ms: 5000,
});

static TRACING_INIT: Once = Once::new();
pub fn setup_tracing() {
    TRACING_INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_writer(tracing_subscriber::fmt::TestWriter::new())
            .init()
    });
}

pub fn random_name(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::now_v7().simple())
}

/// In-process brokers plus one freshly created topic.
pub struct MockKafka {
    pub cluster: MockCluster<'static, DefaultProducerContext>,
    pub topic: String,
    pub group: String,
}

impl MockKafka {
    pub fn new(partitions: i32) -> Self {
        let cluster = MockCluster::new(1).expect("failed to create mock brokers");
        let topic = random_name("load_test");
        cluster
            .create_topic(&topic, partitions, 1)
            .expect("failed to create mock topic");

        MockKafka {
            cluster,
            topic,
            group: random_name("load_test_group"),
        }
    }

    pub fn config(&self) -> KafkaConfig {
        let mut config = DEFAULT_CONFIG.clone();
        config.kafka_hosts = self.cluster.bootstrap_servers();
        config.kafka_topic = self.topic.clone();
        config.kafka_consumer_group = self.group.clone();
        config
    }

    pub async fn probe(&self) -> KafkaProbe {
        KafkaProbe::start(self.config())
            .await
            .expect("failed to start probe on mock cluster")
    }

    /// Commit `offset` for the probe's group, as a consumer of the group would.
    pub fn commit(&self, partition: i32, offset: i64) {
        let consumer: BaseConsumer = ClientConfig::new()
            .set("bootstrap.servers", self.cluster.bootstrap_servers())
            .set("group.id", &self.group)
            .set("enable.auto.commit", "false")
            .create()
            .expect("failed to create committing consumer");

        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(&self.topic, partition, Offset::Offset(offset))
            .expect("failed to build commit list");
        consumer
            .commit(&tpl, CommitMode::Sync)
            .expect("failed to commit offset");
    }

    pub fn reader(&self, partition: i32) -> TopicReader {
        TopicReader::new(&self.cluster.bootstrap_servers(), &self.topic, partition)
    }
}

pub fn message(key: &str, value: &str, header_key: &str, header_value: &str) -> Message {
    Message {
        key: key.to_string(),
        value: value.to_string(),
        header_key: header_key.to_string(),
        header_value: header_value.to_string(),
    }
}

pub fn messages(count: usize) -> Vec<Message> {
    (0..count)
        .map(|i| message(&format!("k{i}"), &format!("v{i}"), "seq", &i.to_string()))
        .collect()
}

/// Reads a partition from the beginning without touching any consumer group offsets.
pub struct TopicReader {
    consumer: BaseConsumer,
    read_timeout: Timeout,
}

impl TopicReader {
    fn new(bootstrap_servers: &str, topic: &str, partition: i32) -> Self {
        let consumer: BaseConsumer = ClientConfig::new()
            .set("bootstrap.servers", bootstrap_servers)
            .set("group.id", random_name("reader"))
            .set("enable.auto.commit", "false")
            .create()
            .expect("failed to create reader");

        let mut assignment = TopicPartitionList::new();
        assignment
            .add_partition_offset(topic, partition, Offset::Beginning)
            .expect("failed to build assignment");
        consumer
            .assign(&assignment)
            .expect("failed to assign partition");

        TopicReader {
            consumer,
            read_timeout: Timeout::After(Duration::from_secs(10)),
        }
    }

    pub fn next_message(&self) -> anyhow::Result<(Message, HashMap<String, String>)> {
        match self.consumer.poll(self.read_timeout) {
            Some(Ok(msg)) => {
                let text = |bytes: Option<&[u8]>| {
                    String::from_utf8(bytes.unwrap_or_default().to_vec()).unwrap_or_default()
                };

                let mut headers = HashMap::new();
                if let Some(borrowed) = msg.headers() {
                    for header in borrowed.iter() {
                        headers.insert(header.key.to_string(), text(header.value));
                    }
                }

                let (header_key, header_value) = headers
                    .iter()
                    .next()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .unwrap_or_default();

                let received = Message {
                    key: text(msg.key()),
                    value: text(msg.payload()),
                    header_key,
                    header_value,
                };
                Ok((received, headers))
            }
            Some(Err(err)) => bail!("kafka read error: {}", err),
            None => bail!("kafka read timeout"),
        }
    }
}
