use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::types::PartitionLag;

pub const METRIC_MESSAGES_ENQUEUED: &str = "kafka_probe_messages_enqueued_total";
pub const METRIC_MESSAGES_DELIVERED: &str = "kafka_probe_messages_delivered_total";
pub const METRIC_PRODUCER_ERRORS: &str = "kafka_probe_producer_errors_total";
pub const METRIC_LATEST_OFFSET: &str = "kafka_probe_latest_offset";
pub const METRIC_COMMITTED_OFFSET: &str = "kafka_probe_committed_offset";
pub const METRIC_CONSUMER_LAG: &str = "kafka_probe_consumer_lag";
pub const METRIC_LAG_CHECK_ERRORS: &str = "kafka_probe_lag_check_errors_total";

/// Register all metrics with descriptions
pub fn register_metrics() {
    describe_counter!(
        METRIC_MESSAGES_ENQUEUED,
        "Messages accepted into the local producer queue"
    );
    describe_counter!(
        METRIC_MESSAGES_DELIVERED,
        "Messages acknowledged by the brokers"
    );
    describe_counter!(
        METRIC_PRODUCER_ERRORS,
        "Messages that failed to produce, by stage"
    );
    describe_counter!(
        METRIC_LAG_CHECK_ERRORS,
        "Lag checks that failed, by error type"
    );
    describe_gauge!(
        METRIC_LATEST_OFFSET,
        "High watermark of the partition"
    );
    describe_gauge!(
        METRIC_COMMITTED_OFFSET,
        "Offset committed by the consumer group"
    );
    describe_gauge!(
        METRIC_CONSUMER_LAG,
        "Number of messages behind for the consumer group"
    );
}

pub fn setup_metrics_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install prometheus recorder")
}

pub fn record_enqueued(topic: &str) {
    counter!(METRIC_MESSAGES_ENQUEUED, "topic" => topic.to_owned()).increment(1);
}

pub fn record_delivered(topic: &str) {
    counter!(METRIC_MESSAGES_DELIVERED, "topic" => topic.to_owned()).increment(1);
}

pub fn record_producer_error(topic: &str, stage: &'static str) {
    counter!(METRIC_PRODUCER_ERRORS, "topic" => topic.to_owned(), "stage" => stage).increment(1);
}

pub fn record_lag_check_error(error_type: &'static str) {
    counter!(METRIC_LAG_CHECK_ERRORS, "error" => error_type).increment(1);
}

/// Record latest, committed and lag gauges for one partition. Committed and lag are left
/// untouched when the group has no commit.
pub fn record_partition_lag(topic: &str, consumergroup: &str, lag: &PartitionLag) {
    let labels = [
        ("topic", topic.to_owned()),
        ("partition", lag.partition.to_string()),
        ("consumergroup", consumergroup.to_owned()),
    ];

    gauge!(METRIC_LATEST_OFFSET, &labels).set(lag.latest as f64);

    if let (Some(committed), Some(behind)) = (lag.committed, lag.lag) {
        gauge!(METRIC_COMMITTED_OFFSET, &labels).set(committed as f64);
        gauge!(METRIC_CONSUMER_LAG, &labels).set(behind as f64);
    }
}
