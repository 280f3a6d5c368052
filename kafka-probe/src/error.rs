use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use thiserror::Error;
use tokio::task::JoinError;

/// Failures that leave the probe unable to do its job: building clients, reaching the
/// cluster, or answering an offset query.
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("failed to create kafka {component}: {source}")]
    ClientCreation {
        component: &'static str,
        #[source]
        source: KafkaError,
    },

    #[error("failed to reach kafka brokers at {hosts}: {source}")]
    Unreachable {
        hosts: String,
        #[source]
        source: KafkaError,
    },

    #[error("{operation} failed for {topic}/{partition}: {source}")]
    OffsetQuery {
        operation: &'static str,
        topic: String,
        partition: i32,
        #[source]
        source: KafkaError,
    },

    #[error("committed_offsets failed for group {group} on {topic} partitions {partitions:?}: {source}")]
    CommittedOffsetQuery {
        group: String,
        topic: String,
        partitions: Vec<i32>,
        #[source]
        source: KafkaError,
    },

    #[error("failed to fetch metadata for topic {topic}: {source}")]
    Metadata {
        topic: String,
        #[source]
        source: KafkaError,
    },

    #[error("topic {0} not found in cluster metadata")]
    UnknownTopic(String),

    #[error("failed to flush producer: {0}")]
    Flush(#[source] KafkaError),

    #[error("kafka connection is closed")]
    Closed,

    #[error("blocking kafka task failed: {0}")]
    Task(#[from] JoinError),
}

impl ConnectionError {
    /// Returns the error type tag for metrics
    pub fn error_type(&self) -> &'static str {
        match self {
            ConnectionError::ClientCreation { .. } => "client_creation",
            ConnectionError::Unreachable { .. } => "unreachable",
            ConnectionError::OffsetQuery { .. } => "offset_query",
            ConnectionError::CommittedOffsetQuery { .. } => "committed_offset_query",
            ConnectionError::Metadata { .. } => "metadata",
            ConnectionError::UnknownTopic(_) => "unknown_topic",
            ConnectionError::Flush(_) => "flush",
            ConnectionError::Closed => "closed",
            ConnectionError::Task(_) => "task",
        }
    }
}

/// A single message failed to produce. Counted and logged, never fatal.
#[derive(Error, Debug)]
pub enum ProduceError {
    #[error("failed to enqueue message: {error}")]
    Enqueue { error: KafkaError },
    #[error("failed to deliver message: {error}")]
    Delivery { error: KafkaError },
    #[error("delivery canceled before an outcome was reported")]
    Canceled,
}

impl ProduceError {
    pub fn stage(&self) -> &'static str {
        match self {
            ProduceError::Enqueue { .. } => "enqueue",
            ProduceError::Delivery { .. } | ProduceError::Canceled => "delivery",
        }
    }

    pub fn rdkafka_error_code(&self) -> Option<RDKafkaErrorCode> {
        match self {
            ProduceError::Enqueue { error } | ProduceError::Delivery { error } => {
                error.rdkafka_error_code()
            }
            ProduceError::Canceled => None,
        }
    }
}

/// One release step of [`crate::KafkaProbe::close`] failed. The remaining steps still run.
#[derive(Error, Debug)]
pub enum CloseError {
    #[error("failed to flush producer: {0}")]
    Producer(#[source] KafkaError),
    #[error("failed to release client: {0}")]
    Client(#[source] KafkaError),
    #[error("blocking flush task failed: {0}")]
    Task(#[source] JoinError),
}
