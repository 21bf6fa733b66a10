//! Snapshot publisher.
//!
//! Every publish is fire-and-forget: the snapshot is moved into a detached
//! tokio task that serializes it and writes one message to Kafka. Failures are
//! logged and counted, never returned to the caller.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rdkafka::config::ClientConfig;
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::Instrument;

use super::snapshot::Snapshot;
use crate::config::PublisherConfig;
use crate::stats::PublishStats;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to serialize snapshot: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to create kafka producer: {0}")]
    Producer(#[source] KafkaError),

    #[error("could not write message: {0}")]
    Delivery(#[source] KafkaError),

    #[error("publish did not complete within {0:?}")]
    Timeout(Duration),
}

/// Where the broker stored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivered {
    pub partition: i32,
    pub offset: i64,
}

/// Writes one serialized message to a topic on a broker list.
pub trait MessageSink: Send + Sync + 'static {
    fn deliver(
        &self,
        topic: &str,
        brokers: &[String],
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<Delivered, PublishError>> + Send;
}

/// Kafka sink. Each delivery builds its own producer and drops it afterwards,
/// so no client state is shared between publishes.
#[derive(Debug, Clone)]
pub struct KafkaSink {
    message_timeout_ms: u64,
}

impl KafkaSink {
    pub fn new(config: &PublisherConfig) -> Self {
        Self {
            message_timeout_ms: config.message_timeout_ms,
        }
    }
}

impl MessageSink for KafkaSink {
    async fn deliver(
        &self,
        topic: &str,
        brokers: &[String],
        payload: Vec<u8>,
    ) -> Result<Delivered, PublishError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers.join(","))
            .set("message.timeout.ms", self.message_timeout_ms.to_string())
            .create()
            .map_err(PublishError::Producer)?;

        // No key: the producer's partitioner spreads keyless messages.
        let record: FutureRecord<'_, (), Vec<u8>> = FutureRecord::to(topic).payload(&payload);
        let result = producer.send(record, Timeout::Never).await;

        // Dropping a producer joins its polling thread.
        tokio::task::spawn_blocking(move || drop(producer));

        match result {
            Ok((partition, offset)) => Ok(Delivered { partition, offset }),
            Err((e, _message)) => Err(PublishError::Delivery(e)),
        }
    }
}

/// Spawns one detached publish task per snapshot.
pub struct Dispatcher<S> {
    sink: Arc<S>,
    semaphore: Arc<Semaphore>,
    timeout: Duration,
    stats: PublishStats,
}

impl<S> Clone for Dispatcher<S> {
    fn clone(&self) -> Self {
        Self {
            sink: self.sink.clone(),
            semaphore: self.semaphore.clone(),
            timeout: self.timeout,
            stats: self.stats.clone(),
        }
    }
}

impl<S: MessageSink> Dispatcher<S> {
    pub fn new(sink: S, config: &PublisherConfig, stats: PublishStats) -> Self {
        Self {
            sink: Arc::new(sink),
            semaphore: Arc::new(Semaphore::new(config.max_in_flight)),
            timeout: Duration::from_secs(config.timeout_secs),
            stats,
        }
    }

    pub fn stats(&self) -> &PublishStats {
        &self.stats
    }

    /// Publish `snapshot` in the background and return immediately.
    ///
    /// The task is not tied to the caller: it keeps running if the proxied
    /// transaction finishes first, bounded only by the publish timeout.
    pub fn dispatch(&self, snapshot: Snapshot, topic: String, brokers: Vec<String>) {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(error = %e, "No async runtime available, dropping snapshot");
                self.stats.inc_dropped();
                return;
            }
        };

        let permit = match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::warn!(
                    correlation_id = %snapshot.correlation_id,
                    "Publish limit reached, dropping snapshot"
                );
                self.stats.inc_dropped();
                return;
            }
        };

        self.stats.inc_dispatched();

        let sink = self.sink.clone();
        let stats = self.stats.clone();
        let timeout = self.timeout;

        runtime.spawn(async move {
            let _permit = permit;
            let span =
                logger_tracing::publish_span!(&snapshot.correlation_id, snapshot.phase(), &topic);

            async {
                let start = Instant::now();
                let result = match tokio::time::timeout(
                    timeout,
                    publish(sink.as_ref(), &snapshot, &topic, &brokers),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(PublishError::Timeout(timeout)),
                };

                let latency = start.elapsed().as_millis() as u64;
                tracing::Span::current().record("latency_ms", latency);

                match result {
                    Ok(delivered) => {
                        tracing::Span::current().record("partition", delivered.partition);
                        tracing::Span::current().record("offset", delivered.offset);
                        tracing::debug!(latency_ms = latency, "Snapshot published");
                        stats.inc_published();
                    }
                    Err(e @ PublishError::Serialize(_)) => {
                        tracing::error!(error = %e, "Dropping snapshot");
                        stats.inc_dropped();
                    }
                    Err(e) => {
                        tracing::error!(
                            error = %e,
                            brokers = ?brokers,
                            latency_ms = latency,
                            "Snapshot publish failed"
                        );
                        stats.inc_failed();
                    }
                }
            }
            .instrument(span)
            .await;
        });
    }
}

async fn publish<S: MessageSink>(
    sink: &S,
    snapshot: &Snapshot,
    topic: &str,
    brokers: &[String],
) -> Result<Delivered, PublishError> {
    let payload = snapshot.to_payload()?;
    tracing::Span::current().record("payload_bytes", payload.len());
    sink.deliver(topic, brokers, payload).await
}


#[cfg(test)]
mod tests {
    use super::testing::{FailingSink, RecordingSink};
    use super::*;
    use crate::stats::StatsSnapshot;
    use crate::telemetry::snapshot::{Capture, ResponseFields};
    use bytes::Bytes;
    use chrono::Utc;

    fn snapshot(id: &str) -> Snapshot {
        Snapshot {
            correlation_id: id.to_string(),
            capture: Capture::Response(ResponseFields {
                path: Some("/orders".to_string()),
                status_code: Some(200),
                body: Some(Bytes::from_static(b"ok")),
                headers: None,
            }),
            date: Utc::now(),
        }
    }

    fn publisher_config(max_in_flight: usize, timeout_secs: u64) -> PublisherConfig {
        PublisherConfig {
            max_in_flight,
            timeout_secs,
            message_timeout_ms: 1000,
        }
    }

    async fn wait_for_stats(stats: &PublishStats, done: impl Fn(&StatsSnapshot) -> bool) -> StatsSnapshot {
        for _ in 0..200 {
            if done(&stats.snapshot()) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        stats.snapshot()
    }

    #[tokio::test]
    async fn test_dispatch_delivers_payload_to_topic_and_brokers() {
        let sink = RecordingSink::default();
        let dispatcher = Dispatcher::new(sink.clone(), &publisher_config(4, 5), PublishStats::new());

        dispatcher.dispatch(
            snapshot("abc-123"),
            "events".to_string(),
            vec!["b1:9092".to_string(), "b2:9092".to_string()],
        );

        let sent = sink.wait_for(1).await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].topic, "events");
        assert_eq!(sent[0].brokers, vec!["b1:9092", "b2:9092"]);
        assert_eq!(sent[0].payload["trace-id"], "abc-123");
        assert_eq!(sent[0].payload["response"]["statusCode"], 200);

        let stats = wait_for_stats(dispatcher.stats(), |s| s.published == 1).await;
        assert_eq!(stats.dispatched, 1);
        assert_eq!(stats.failed, 0);
    }

    #[tokio::test]
    async fn test_failed_delivery_is_counted_not_retried() {
        let sink = FailingSink::default();
        let dispatcher = Dispatcher::new(sink.clone(), &publisher_config(4, 5), PublishStats::new());

        dispatcher.dispatch(snapshot("abc-123"), "events".to_string(), vec!["b:9092".to_string()]);

        let stats = wait_for_stats(dispatcher.stats(), |s| s.failed == 1).await;
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.published, 0);
        assert_eq!(sink.attempts(), 1);
    }

    #[tokio::test]
    async fn test_publish_timeout_counts_as_failure() {
        let sink = FailingSink::with_delay(Duration::from_secs(30));
        let dispatcher = Dispatcher::new(sink, &publisher_config(4, 0), PublishStats::new());

        dispatcher.dispatch(snapshot("abc-123"), "events".to_string(), vec!["b:9092".to_string()]);

        let stats = wait_for_stats(dispatcher.stats(), |s| s.failed == 1).await;
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test]
    async fn test_in_flight_limit_drops_instead_of_blocking() {
        let sink = FailingSink::with_delay(Duration::from_millis(500));
        let dispatcher = Dispatcher::new(sink, &publisher_config(1, 5), PublishStats::new());

        let start = Instant::now();
        dispatcher.dispatch(snapshot("first"), "events".to_string(), vec!["b:9092".to_string()]);
        dispatcher.dispatch(snapshot("second"), "events".to_string(), vec!["b:9092".to_string()]);
        assert!(start.elapsed() < Duration::from_millis(100));

        let stats = dispatcher.stats().snapshot();
        assert_eq!(stats.dispatched, 1);
        assert_eq!(stats.dropped, 1);
    }

    #[test]
    fn test_dispatch_without_runtime_drops() {
        let dispatcher =
            Dispatcher::new(RecordingSink::default(), &publisher_config(4, 5), PublishStats::new());
        dispatcher.dispatch(snapshot("abc-123"), "events".to_string(), vec!["b:9092".to_string()]);
        assert_eq!(dispatcher.stats().snapshot().dropped, 1);
    }
}
