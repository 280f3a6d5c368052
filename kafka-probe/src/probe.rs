use std::sync::Arc;
use std::time::Duration;

use rdkafka::admin::AdminClient;
use rdkafka::client::DefaultClientContext;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::ClientConfig;
use tracing::{debug, error, info};

use crate::config::KafkaConfig;
use crate::error::{CloseError, ConnectionError};
use crate::offsets::OffsetInspector;
use crate::producer::{AsyncProducer, CounterSnapshot, DeliveryReport, ProduceCounters, SendReport};
use crate::types::{LagReport, Message, OffsetRecord, PartitionLag};

/// Publishes messages to one topic and reports offsets and lag for one consumer group.
///
/// The producer, admin client and group client share one client configuration and are
/// released together by [`KafkaProbe::close`].
pub struct KafkaProbe {
    config: KafkaConfig,
    counters: Arc<ProduceCounters>,
    producer: Option<AsyncProducer>,
    admin: Option<Arc<AdminClient<DefaultClientContext>>>,
    client: Option<Arc<BaseConsumer>>,
}

impl KafkaProbe {
    /// Create all three clients and check the brokers answer a metadata request.
    pub async fn start(config: KafkaConfig) -> Result<KafkaProbe, ConnectionError> {
        info!("connecting to Kafka brokers at {}...", config.kafka_hosts);

        let mut common_config = ClientConfig::new();
        common_config
            .set("bootstrap.servers", &config.kafka_hosts)
            // Queries on a missing topic must fail, not create it
            .set("allow.auto.create.topics", "false");

        if config.kafka_tls {
            common_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };

        let counters = Arc::new(ProduceCounters::default());
        let producer = AsyncProducer::new(&common_config, &config, counters.clone()).map_err(
            |source| ConnectionError::ClientCreation {
                component: "producer",
                source,
            },
        )?;

        let admin: AdminClient<DefaultClientContext> =
            common_config
                .create()
                .map_err(|source| ConnectionError::ClientCreation {
                    component: "admin client",
                    source,
                })?;

        let client: BaseConsumer = common_config
            .clone()
            .set("group.id", &config.kafka_consumer_group)
            .set("enable.auto.commit", "false")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|source| ConnectionError::ClientCreation {
                component: "consumer group client",
                source,
            })?;

        // Ping the cluster to make sure we can reach brokers
        let admin = Arc::new(admin);
        let ping = admin.clone();
        let timeout = config.query_timeout();
        let metadata = tokio::task::spawn_blocking(move || ping.inner().fetch_metadata(None, timeout))
            .await?
            .map_err(|source| ConnectionError::Unreachable {
                hosts: config.kafka_hosts.clone(),
                source,
            })?;
        info!(
            "connected to Kafka brokers, found {} topics",
            metadata.topics().len()
        );

        Ok(KafkaProbe {
            config,
            counters,
            producer: Some(producer),
            admin: Some(admin),
            client: Some(Arc::new(client)),
        })
    }

    pub fn config(&self) -> &KafkaConfig {
        &self.config
    }

    pub fn counters(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }

    pub fn is_closed(&self) -> bool {
        self.producer.is_none() && self.admin.is_none() && self.client.is_none()
    }

    /// Publish `messages` in order to the configured topic. The report holds each message's
    /// local outcome; broker outcomes arrive through [`KafkaProbe::flush`].
    pub async fn send(&self, messages: &[Message]) -> Result<SendReport, ConnectionError> {
        let producer = self.producer.as_ref().ok_or(ConnectionError::Closed)?;
        Ok(producer.send(messages).await)
    }

    pub async fn flush(&self, timeout: Duration) -> Result<Vec<DeliveryReport>, ConnectionError> {
        let producer = self.producer.as_ref().ok_or(ConnectionError::Closed)?;
        producer.flush(timeout).await
    }

    pub fn offsets(&self) -> Result<OffsetInspector<'_>, ConnectionError> {
        match (&self.admin, &self.client) {
            (Some(admin), Some(client)) => Ok(OffsetInspector {
                admin,
                client,
                topic: &self.config.kafka_topic,
                consumer_group: &self.config.kafka_consumer_group,
                timeout: self.config.query_timeout(),
            }),
            _ => Err(ConnectionError::Closed),
        }
    }

    /// High watermark of the configured partition. Despite being a group-facing number
    /// for lag, it never looks at the consumer group.
    pub async fn latest_offset(&self) -> Result<i64, ConnectionError> {
        self.latest_offset_for(self.config.kafka_partition).await
    }

    pub async fn latest_offset_for(&self, partition: i32) -> Result<i64, ConnectionError> {
        self.offsets()?.latest_offset(partition).await
    }

    /// Committed offset of the configured group on the configured partition. Returns
    /// `OffsetRecord::default()` when the group has not committed there.
    pub async fn committed_offset(&self) -> Result<OffsetRecord, ConnectionError> {
        self.committed_offset_for(self.config.kafka_partition).await
    }

    pub async fn committed_offset_for(
        &self,
        partition: i32,
    ) -> Result<OffsetRecord, ConnectionError> {
        self.offsets()?.committed_offset(partition).await
    }

    pub async fn lag(&self) -> Result<PartitionLag, ConnectionError> {
        self.offsets()?.lag(self.config.kafka_partition).await
    }

    pub async fn lag_report(&self) -> Result<LagReport, ConnectionError> {
        self.offsets()?.lag_report().await
    }

    /// Release the producer, then the admin client, then the group client. A failing step
    /// is logged and returned without stopping the ones after it. Closing twice is fine.
    ///
    /// The producer flush runs on the blocking pool, and every delivery outcome it
    /// settles is recorded in [`KafkaProbe::counters`] before the producer is dropped.
    pub async fn close(&mut self) -> Vec<CloseError> {
        let mut errors = Vec::new();
        let timeout = self.config.query_timeout();

        if let Some(producer) = self.producer.take() {
            if let Err(err) = producer.close(timeout).await {
                error!("error closing producer: {}", err);
                errors.push(err);
            }
        }

        if self.admin.take().is_some() {
            debug!("admin client released");
        }

        match self.client.take() {
            Some(client) => {
                if let Err(err) = client.unassign() {
                    error!("error closing client: {}", err);
                    errors.push(CloseError::Client(err));
                }
                info!("closed Kafka connection to {}", self.config.kafka_hosts);
            }
            None => debug!("client already closed"),
        }

        errors
    }
}
