use std::sync::Arc;
use std::time::Duration;

use rdkafka::admin::AdminClient;
use rdkafka::client::DefaultClientContext;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::TopicPartitionList;
use tracing::debug;

use crate::error::ConnectionError;
use crate::metrics;
use crate::types::{LagReport, OffsetRecord, PartitionLag};

/// Offset queries for one topic and consumer group.
///
/// Watermarks and committed offsets are read through a group-scoped `BaseConsumer` that
/// never subscribes, so asking never disturbs the group. Partition discovery goes through
/// the admin client's metadata. Every librdkafka call here blocks, so each runs on the
/// blocking pool.
pub struct OffsetInspector<'a> {
    pub(crate) admin: &'a Arc<AdminClient<DefaultClientContext>>,
    pub(crate) client: &'a Arc<BaseConsumer>,
    pub(crate) topic: &'a str,
    pub(crate) consumer_group: &'a str,
    pub(crate) timeout: Duration,
}

impl OffsetInspector<'_> {
    /// High watermark of the partition: the offset the next published message will get.
    pub async fn latest_offset(&self, partition: i32) -> Result<i64, ConnectionError> {
        let client = self.client.clone();
        let topic = self.topic.to_owned();
        let timeout = self.timeout;

        let (_, high) =
            tokio::task::spawn_blocking(move || client.fetch_watermarks(&topic, partition, timeout))
                .await?
                .map_err(|source| ConnectionError::OffsetQuery {
                    operation: "fetch_watermarks",
                    topic: self.topic.to_owned(),
                    partition,
                    source,
                })?;

        Ok(high)
    }

    async fn committed_offsets(
        &self,
        partitions: &[i32],
    ) -> Result<TopicPartitionList, ConnectionError> {
        let mut tpl = TopicPartitionList::new();
        for partition in partitions {
            tpl.add_partition(self.topic, *partition);
        }

        let client = self.client.clone();
        let timeout = self.timeout;

        tokio::task::spawn_blocking(move || client.committed_offsets(tpl, timeout))
            .await?
            .map_err(|source| ConnectionError::CommittedOffsetQuery {
                group: self.consumer_group.to_owned(),
                topic: self.topic.to_owned(),
                partitions: partitions.to_vec(),
                source,
            })
    }

    /// The group's committed offset on the partition, or the empty record if it never
    /// committed there.
    pub async fn committed_offset(&self, partition: i32) -> Result<OffsetRecord, ConnectionError> {
        let committed = self.committed_offsets(&[partition]).await?;

        let record = committed
            .find_partition(self.topic, partition)
            .map(|elem| OffsetRecord::from_committed(&elem))
            .unwrap_or_default();

        if record.is_empty() {
            debug!(
                "No committed offset for {} on {}/{}",
                self.consumer_group, self.topic, partition
            );
        }

        Ok(record)
    }

    pub async fn partitions(&self) -> Result<Vec<i32>, ConnectionError> {
        let admin = self.admin.clone();
        let topic = self.topic.to_owned();
        let timeout = self.timeout;

        let partitions = tokio::task::spawn_blocking(move || {
            admin.inner().fetch_metadata(Some(topic.as_str()), timeout).map(|metadata| {
                metadata
                    .topics()
                    .iter()
                    .find(|t| t.name() == topic && t.error().is_none())
                    .map(|t| t.partitions().iter().map(|p| p.id()).collect::<Vec<_>>())
            })
        })
        .await?
        .map_err(|source| ConnectionError::Metadata {
            topic: self.topic.to_owned(),
            source,
        })?;

        match partitions {
            Some(mut partitions) if !partitions.is_empty() => {
                partitions.sort_unstable();
                Ok(partitions)
            }
            _ => Err(ConnectionError::UnknownTopic(self.topic.to_owned())),
        }
    }

    pub async fn lag(&self, partition: i32) -> Result<PartitionLag, ConnectionError> {
        let latest = self.latest_offset(partition).await?;
        let committed = self.committed_offset(partition).await?;

        let lag = PartitionLag::new(partition, latest, committed.offset);
        metrics::record_partition_lag(self.topic, self.consumer_group, &lag);
        Ok(lag)
    }

    /// Lag on every partition of the topic, from one committed-offsets request and one
    /// watermark request per partition.
    pub async fn lag_report(&self) -> Result<LagReport, ConnectionError> {
        let partitions = self.partitions().await?;
        let committed = self.committed_offsets(&partitions).await?;

        let mut lags = Vec::with_capacity(partitions.len());
        for partition in partitions {
            let latest = self.latest_offset(partition).await?;
            let committed = committed
                .find_partition(self.topic, partition)
                .map(|elem| OffsetRecord::from_committed(&elem))
                .unwrap_or_default();

            let lag = PartitionLag::new(partition, latest, committed.offset);
            metrics::record_partition_lag(self.topic, self.consumer_group, &lag);
            lags.push(lag);
        }

        Ok(LagReport::new(self.topic, self.consumer_group, lags))
    }
}
