use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{DeliveryFuture, FutureProducer, FutureRecord, Producer};
use rdkafka::ClientConfig;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use crate::config::KafkaConfig;
use crate::context::ProbeContext;
use crate::error::{CloseError, ConnectionError, ProduceError};
use crate::metrics;
use crate::types::Message;

// Pause between retries while librdkafka's local queue is full
const QUEUE_FULL_BACKOFF: Duration = Duration::from_millis(10);

// Delivery reports held for the next flush. Past this, the oldest are dropped; counters
// still see every outcome.
const MAX_RETAINED_REPORTS: usize = 100_000;

/// Identity of one accepted message, unique within a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct MessageId(pub u64);

/// Produce totals for a single probe.
#[derive(Debug, Default)]
pub struct ProduceCounters {
    enqueued: AtomicU64,
    producer_errors: AtomicU64,
    delivered: AtomicU64,
    delivery_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub enqueued: u64,
    pub producer_errors: u64,
    pub delivered: u64,
    pub delivery_errors: u64,
}

impl ProduceCounters {
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            producer_errors: self.producer_errors.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            delivery_errors: self.delivery_errors.load(Ordering::Relaxed),
        }
    }

    fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    fn record_enqueue_error(&self) {
        self.producer_errors.fetch_add(1, Ordering::Relaxed);
    }

    fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    // Delivery failures count as producer errors too, so producer_errors covers every
    // failed message whichever path reported it.
    fn record_delivery_error(&self) {
        self.delivery_errors.fetch_add(1, Ordering::Relaxed);
        self.producer_errors.fetch_add(1, Ordering::Relaxed);
    }
}

/// Local outcome of handing one message to the producer.
#[derive(Debug)]
pub enum Submission {
    Accepted(MessageId),
    Rejected(ProduceError),
}

/// Submission outcomes, one per input message and in input order.
#[derive(Debug, Default)]
pub struct SendReport {
    pub submissions: Vec<Submission>,
}

impl SendReport {
    pub fn enqueued(&self) -> usize {
        self.accepted().count()
    }

    pub fn errors(&self) -> usize {
        self.submissions.len() - self.enqueued()
    }

    pub fn accepted(&self) -> impl Iterator<Item = MessageId> + '_ {
        self.submissions.iter().filter_map(|s| match s {
            Submission::Accepted(id) => Some(*id),
            Submission::Rejected(_) => None,
        })
    }
}

/// Broker outcome for one accepted message: its partition and offset, or the error.
#[derive(Debug)]
pub struct DeliveryReport {
    pub id: MessageId,
    pub result: Result<(i32, i64), ProduceError>,
}

/// Delivery tasks still waiting on the broker, plus finished reports not yet flushed.
struct Deliveries {
    pending: JoinSet<DeliveryReport>,
    completed: VecDeque<DeliveryReport>,
    capacity: usize,
    dropped: u64,
}

impl Deliveries {
    fn with_capacity(capacity: usize) -> Self {
        Deliveries {
            pending: JoinSet::new(),
            completed: VecDeque::new(),
            capacity,
            dropped: 0,
        }
    }

    fn retain(&mut self, report: DeliveryReport) {
        if self.completed.len() >= self.capacity {
            self.completed.pop_front();
            self.dropped += 1;
        }
        self.completed.push_back(report);
    }

    fn collect(&mut self, res: Result<DeliveryReport, tokio::task::JoinError>) {
        match res {
            Ok(report) => self.retain(report),
            Err(err) => warn!("join error while waiting on Kafka ACK: {:?}", err),
        }
    }

    /// Move finished tasks into `completed` without waiting on the rest.
    fn reap(&mut self) {
        while let Some(res) = self.pending.try_join_next() {
            self.collect(res);
        }
    }

    async fn join_all(&mut self) {
        while let Some(res) = self.pending.join_next().await {
            self.collect(res);
        }
    }

    fn into_reports(self) -> Vec<DeliveryReport> {
        if self.dropped > 0 {
            warn!(
                "{} delivery reports were dropped before flush, counters still include them",
                self.dropped
            );
        }
        let mut reports: Vec<_> = self.completed.into();
        reports.sort_by_key(|r| r.id);
        reports
    }
}

pub struct AsyncProducer {
    producer: FutureProducer<ProbeContext>,
    topic: String,
    enqueue_timeout: Duration,
    counters: Arc<ProduceCounters>,
    next_id: AtomicU64,
    deliveries: Mutex<Deliveries>,
}

impl AsyncProducer {
    pub fn new(
        common_config: &ClientConfig,
        config: &KafkaConfig,
        counters: Arc<ProduceCounters>,
    ) -> Result<Self, KafkaError> {
        let mut client_config = common_config.clone();
        client_config
            .set("statistics.interval.ms", "10000")
            .set("linger.ms", config.kafka_producer_linger_ms.to_string())
            .set(
                "message.timeout.ms",
                config.kafka_message_timeout_ms.to_string(),
            )
            .set(
                "compression.codec",
                config.kafka_compression_codec.to_owned(),
            )
            .set(
                "queue.buffering.max.kbytes",
                queue_buffering_max_kbytes(config.kafka_producer_queue_mib).to_string(),
            )
            .set(
                "queue.buffering.max.messages",
                config.kafka_producer_queue_messages.to_string(),
            );

        debug!("rdkafka producer configuration: {:?}", client_config);
        let producer: FutureProducer<ProbeContext> =
            client_config.create_with_context(ProbeContext::new(&config.kafka_topic))?;

        Ok(AsyncProducer {
            producer,
            topic: config.kafka_topic.clone(),
            enqueue_timeout: config.message_timeout(),
            counters,
            next_id: AtomicU64::new(0),
            deliveries: Mutex::new(Deliveries::with_capacity(MAX_RETAINED_REPORTS)),
        })
    }

    /// Hand every message to the producer queue, in order. Broker outcomes are collected
    /// in the background and returned by [`AsyncProducer::flush`].
    pub async fn send(&self, messages: &[Message]) -> SendReport {
        let mut submissions = Vec::with_capacity(messages.len());

        for message in messages {
            let submission = match self.enqueue(message).await {
                Ok(delivery) => {
                    let id = MessageId(self.next_id.fetch_add(1, Ordering::Relaxed));
                    self.counters.record_enqueued();
                    metrics::record_enqueued(&self.topic);
                    self.track(id, delivery);
                    Submission::Accepted(id)
                }
                Err(err) => {
                    self.counters.record_enqueue_error();
                    metrics::record_producer_error(&self.topic, err.stage());
                    error!("failed to produce message: {}", err);
                    Submission::Rejected(err)
                }
            };
            submissions.push(submission);
        }

        SendReport { submissions }
    }

    async fn enqueue(&self, message: &Message) -> Result<DeliveryFuture, ProduceError> {
        let started = Instant::now();
        let mut record = FutureRecord::to(&self.topic)
            .key(message.key.as_str())
            .payload(message.value.as_str())
            .headers(OwnedHeaders::new().insert(Header {
                key: &message.header_key,
                value: Some(message.header_value.as_str()),
            }));

        loop {
            match self.producer.send_result(record) {
                Ok(delivery) => return Ok(delivery),
                Err((KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull), returned))
                    if started.elapsed() < self.enqueue_timeout =>
                {
                    record = returned;
                    tokio::time::sleep(QUEUE_FULL_BACKOFF).await;
                }
                Err((error, _)) => return Err(ProduceError::Enqueue { error }),
            }
        }
    }

    fn track(&self, id: MessageId, delivery: DeliveryFuture) {
        let counters = self.counters.clone();
        let topic = self.topic.clone();

        let mut deliveries = self
            .deliveries
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        deliveries.reap();
        deliveries.pending.spawn(async move {
            let result = match delivery.await {
                Ok(Ok((partition, offset))) => {
                    debug!("message {:?} delivered to {}/{}@{}", id, topic, partition, offset);
                    counters.record_delivered();
                    metrics::record_delivered(&topic);
                    Ok((partition, offset))
                }
                Ok(Err((error, _))) => Err(ProduceError::Delivery { error }),
                // Cancelled because the producer went away first
                Err(_) => Err(ProduceError::Canceled),
            };

            if let Err(err) = &result {
                counters.record_delivery_error();
                metrics::record_producer_error(&topic, err.stage());
                error!("failed to produce message {:?}: {}", id, err);
            }

            DeliveryReport { id, result }
        });
    }

    fn take_deliveries(&self) -> Deliveries {
        let mut deliveries = self
            .deliveries
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let capacity = deliveries.capacity;
        std::mem::replace(&mut *deliveries, Deliveries::with_capacity(capacity))
    }

    /// Wait for the producer queue to drain, then collect the outcome of every message
    /// accepted since the previous flush, sorted by id.
    pub async fn flush(&self, timeout: Duration) -> Result<Vec<DeliveryReport>, ConnectionError> {
        let producer = self.producer.clone();
        tokio::task::spawn_blocking(move || producer.flush(timeout))
            .await?
            .map_err(ConnectionError::Flush)?;

        let mut deliveries = self.take_deliveries();
        deliveries.join_all().await;
        Ok(deliveries.into_reports())
    }

    /// Flush what is still queued and record every outcome in the counters, then drop
    /// the producer. If the flush fails, only outcomes already known are recorded.
    pub async fn close(self, timeout: Duration) -> Result<(), CloseError> {
        let outstanding = self.producer.in_flight_count();
        if outstanding > 0 {
            debug!("flushing {} outstanding messages before close", outstanding);
        }

        let producer = self.producer.clone();
        let flushed = tokio::task::spawn_blocking(move || producer.flush(timeout)).await;

        let mut deliveries = self.take_deliveries();
        match flushed {
            Ok(Ok(())) => {
                deliveries.join_all().await;
                Ok(())
            }
            Ok(Err(err)) => {
                deliveries.reap();
                Err(CloseError::Producer(err))
            }
            Err(err) => {
                deliveries.reap();
                Err(CloseError::Task(err))
            }
        }
    }
}

fn queue_buffering_max_kbytes(queue_mib: u32) -> u64 {
    u64::from(queue_mib) * 1024
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn producer_errors_cover_both_stages() {
        let counters = ProduceCounters::default();
        counters.record_enqueued();
        counters.record_enqueued();
        counters.record_delivered();
        counters.record_delivery_error();
        counters.record_enqueue_error();

        assert_eq!(
            counters.snapshot(),
            CounterSnapshot {
                enqueued: 2,
                producer_errors: 2,
                delivered: 1,
                delivery_errors: 1,
            }
        );
    }

    fn delivered(id: u64) -> DeliveryReport {
        DeliveryReport {
            id: MessageId(id),
            result: Ok((0, i64::try_from(id).unwrap())),
        }
    }

    #[test]
    fn retained_reports_are_bounded() {
        let mut deliveries = Deliveries::with_capacity(2);
        for id in 0..5 {
            deliveries.retain(delivered(id));
        }

        assert_eq!(deliveries.dropped, 3);
        let ids: Vec<_> = deliveries.into_reports().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![MessageId(3), MessageId(4)]);
    }

    #[tokio::test]
    async fn finished_tasks_are_reaped_without_a_flush() {
        let mut deliveries = Deliveries::with_capacity(MAX_RETAINED_REPORTS);
        for id in 0..3 {
            deliveries.pending.spawn(async move { delivered(id) });
        }

        for _ in 0..10 {
            tokio::task::yield_now().await;
            deliveries.reap();
            if deliveries.pending.is_empty() {
                break;
            }
        }

        assert!(deliveries.pending.is_empty());
        assert_eq!(deliveries.completed.len(), 3);
    }

    #[test]
    fn queue_size_does_not_overflow() {
        assert_eq!(queue_buffering_max_kbytes(400), 409_600);
        assert_eq!(
            queue_buffering_max_kbytes(u32::MAX),
            u64::from(u32::MAX) * 1024
        );
    }

    #[test]
    fn send_report_keeps_input_order() {
        let report = SendReport {
            submissions: vec![
                Submission::Accepted(MessageId(0)),
                Submission::Rejected(ProduceError::Enqueue {
                    error: KafkaError::MessageProduction(RDKafkaErrorCode::MessageSizeTooLarge),
                }),
                Submission::Accepted(MessageId(1)),
            ],
        };

        assert_eq!(report.enqueued(), 2);
        assert_eq!(report.errors(), 1);
        assert_eq!(
            report.accepted().collect::<Vec<_>>(),
            vec![MessageId(0), MessageId(1)]
        );
    }
}
