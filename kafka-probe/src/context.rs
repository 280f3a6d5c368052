use metrics::gauge;

/// Client context for the probe's producer. Forwards librdkafka statistics to metrics.
pub struct ProbeContext {
    topic: String,
}

impl ProbeContext {
    pub fn new(topic: &str) -> Self {
        ProbeContext {
            topic: topic.to_owned(),
        }
    }
}

impl rdkafka::ClientContext for ProbeContext {
    fn stats(&self, stats: rdkafka::Statistics) {
        gauge!("kafka_probe_callback_queue_depth").set(stats.replyq as f64);
        gauge!("kafka_probe_producer_queue_depth").set(stats.msg_cnt as f64);
        gauge!("kafka_probe_producer_queue_depth_limit").set(stats.msg_max as f64);
        gauge!("kafka_probe_producer_queue_bytes").set(stats.msg_size as f64);
        gauge!("kafka_probe_producer_queue_bytes_limit").set(stats.msg_size_max as f64);

        if let Some(topic_stats) = stats.topics.get(&self.topic) {
            gauge!(
                "kafka_probe_produce_avg_batch_size_events",
                "topic" => self.topic.clone()
            )
            .set(topic_stats.batchcnt.avg as f64);
        }

        for (_, stats) in stats.brokers {
            let id_string = format!("{}", stats.nodeid);
            gauge!(
                "kafka_probe_broker_requests_pending",
                "broker" => id_string.clone()
            )
            .set(stats.outbuf_cnt as f64);
            gauge!(
                "kafka_probe_broker_responses_awaiting",
                "broker" => id_string
            )
            .set(stats.waitresp_cnt as f64);
        }
    }
}
