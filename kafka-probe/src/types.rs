use rdkafka::error::RDKafkaErrorCode;
use rdkafka::topic_partition_list::{Offset, TopicPartitionListElem};
use serde::{Deserialize, Serialize};

/// A keyed message carrying exactly one header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub key: String,
    pub value: String,
    pub header_key: String,
    pub header_value: String,
}

/// A consumer group's committed position on one partition.
///
/// `OffsetRecord::default()` is the empty record returned when the group has never
/// committed on the partition. `offset` is `None` there, which keeps it apart from a
/// real commit at offset 0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OffsetRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: Option<i64>,
    pub metadata: String,
    pub error: Option<RDKafkaErrorCode>,
    // librdkafka keeps the epoch internal for committed offsets; always None for now
    pub leader_epoch: Option<i32>,
}

impl OffsetRecord {
    pub fn is_empty(&self) -> bool {
        self.offset.is_none() && self.error.is_none()
    }

    pub(crate) fn from_committed(elem: &TopicPartitionListElem<'_>) -> Self {
        let offset = match elem.offset() {
            Offset::Offset(offset) => Some(offset),
            _ => None,
        };
        let error = elem
            .error()
            .err()
            .map(|e| e.rdkafka_error_code().unwrap_or(RDKafkaErrorCode::Fail));

        if offset.is_none() && error.is_none() {
            return OffsetRecord::default();
        }

        OffsetRecord {
            topic: elem.topic().to_owned(),
            partition: elem.partition(),
            offset,
            metadata: elem.metadata().to_owned(),
            error,
            leader_epoch: None,
        }
    }
}

/// Offsets and lag for one partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionLag {
    pub partition: i32,
    pub latest: i64,
    pub committed: Option<i64>,
    // None when the group has no commit on the partition
    pub lag: Option<i64>,
}

impl PartitionLag {
    pub fn new(partition: i32, latest: i64, committed: Option<i64>) -> Self {
        let lag = committed.map(|committed| (latest - committed).max(0));
        PartitionLag {
            partition,
            latest,
            committed,
            lag,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LagReport {
    pub topic: String,
    pub consumer_group: String,
    pub partitions: Vec<PartitionLag>,
    pub total_lag: i64,
    pub uncommitted_partitions: usize,
}

impl LagReport {
    pub fn new(topic: &str, consumer_group: &str, partitions: Vec<PartitionLag>) -> Self {
        let total_lag = partitions.iter().filter_map(|p| p.lag).sum();
        let uncommitted_partitions = partitions.iter().filter(|p| p.lag.is_none()).count();

        LagReport {
            topic: topic.to_owned(),
            consumer_group: consumer_group.to_owned(),
            partitions,
            total_lag,
            uncommitted_partitions,
        }
    }
}
