pub mod backoff;
pub mod quarantine;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::stream::FuturesOrdered;
use futures::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::Semaphore;

use crate::broker::{Broker, Delivery};
use crate::evidence::SourceKind;
use crate::metrics::Metrics;
use crate::parsers::parse_for_subject;
use crate::rules::RuleEngine;

use backoff::Backoff;
use quarantine::QuarantineCircuit;

const POISON_PREVIEW_LEN: usize = 256;

enum DeliveryOutcome {
    Published,
    PublishFailed,
    Poisoned { preview: String },
}

/// One durable-consumer task per subject (`endpoint.events`, `network.events`,
/// `gateway.events`); parse and rule-apply run on a shared worker pool bounded
/// by a semaphore, but results are published to `enriched.{source}` in the
/// order they were received so per-subject FIFO is preserved even though the
/// work itself runs concurrently (spec §4.3, §5).
pub struct StreamIngestSupervisor {
    broker: Arc<dyn Broker>,
    rule_engine: Arc<RuleEngine>,
    metrics: Arc<Metrics>,
    worker_permits: Arc<Semaphore>,
    stopping: AtomicBool,
}

impl StreamIngestSupervisor {
    pub fn new(
        broker: Arc<dyn Broker>,
        rule_engine: Arc<RuleEngine>,
        metrics: Arc<Metrics>,
        worker_parallelism: usize,
    ) -> Self {
        Self {
            broker,
            rule_engine,
            metrics,
            worker_permits: Arc::new(Semaphore::new(worker_parallelism.max(1))),
            stopping: AtomicBool::new(false),
        }
    }

    /// Stops accepting new deliveries on every subject (graceful-shutdown
    /// step "a", spec §5); work already in flight still drains normally.
    pub fn stop_accepting(&self) {
        self.stopping.store(true, Ordering::SeqCst);
    }

    /// Spawns one supervised consumer task per source and awaits them all.
    /// Each task reconnects independently on broker failure; this only
    /// returns once every source task has exited (which, barring a panic,
    /// is never under normal operation).
    pub async fn run(self: Arc<Self>) {
        let sources = [SourceKind::Endpoint, SourceKind::Network, SourceKind::Gateway];
        let mut handles = Vec::with_capacity(sources.len());
        for source in sources {
            let this = self.clone();
            handles.push(tokio::spawn(async move { this.run_subject(source).await }));
        }
        for handle in handles {
            if let Err(e) = handle.await {
                error!(target: "ingest", "consumer task for a subject panicked: {e}");
            }
        }
    }

    async fn run_subject(self: Arc<Self>, source: SourceKind) {
        let subject = format!("{}.events", source.as_subject_suffix());
        let enriched_subject = format!("enriched.{}", source.as_subject_suffix());
        let deadletter_subject = format!("deadletter.{}", source.as_subject_suffix());
        let mut reconnect = Backoff::new();

        'reconnect: loop {
            if self.stopping.load(Ordering::SeqCst) {
                return;
            }

            let mut rx = match self.broker.subscribe(&subject).await {
                Ok(rx) => {
                    reconnect.reset();
                    info!(target: "ingest", "subscribed to {subject}");
                    rx
                }
                Err(e) => {
                    let delay = reconnect.next_delay();
                    warn!(target: "ingest", "subscribe to {subject} failed ({e}), retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                    continue;
                }
            };

            let mut circuit = QuarantineCircuit::new();
            let mut inflight: FuturesOrdered<_> = FuturesOrdered::new();

            loop {
                tokio::select! {
                    biased;

                    Some(outcome) = inflight.next(), if !inflight.is_empty() => {
                        self.apply_outcome(source, outcome, &mut circuit);
                    }

                    delivery = rx.recv(), if !self.stopping.load(Ordering::SeqCst) => {
                        match delivery {
                            Some(delivery) => {
                                if circuit.is_open(Instant::now()) {
                                    self.route_to_deadletter(&deadletter_subject, delivery).await;
                                    continue;
                                }
                                let permit = self.worker_permits.clone().acquire_owned().await.expect("semaphore never closes");
                                let this = self.clone();
                                let enriched_subject = enriched_subject.clone();
                                inflight.push_back(async move {
                                    let _permit = permit;
                                    this.process_delivery(source, delivery, &enriched_subject).await
                                });
                            }
                            None => {
                                warn!(target: "ingest", "broker closed {subject}, reconnecting");
                                break;
                            }
                        }
                    }
                }

                if self.stopping.load(Ordering::SeqCst) && inflight.is_empty() {
                    break 'reconnect;
                }
            }

            // Drain whatever was still in flight before the reconnect.
            while let Some(outcome) = inflight.next().await {
                self.apply_outcome(source, outcome, &mut circuit);
            }
        }
    }

    async fn process_delivery(
        &self,
        source: SourceKind,
        delivery: Delivery,
        enriched_subject: &str,
    ) -> DeliveryOutcome {
        let record = match parse_for_subject(source, &delivery.payload) {
            Ok(record) => {
                let lag_ms = (chrono::Utc::now() - record.ts).num_milliseconds().max(0) as u64;
                self.metrics.record_lag(source, lag_ms);
                record
            }
            Err(e) => {
                let preview = String::from_utf8_lossy(
                    crate::evidence::truncate_utf8_safe(&delivery.payload, POISON_PREVIEW_LEN),
                )
                .into_owned();
                debug!(target: "ingest", "poison on {}: {e} ({preview})", delivery.subject);
                let _ = self.broker.ack(&delivery).await;
                return DeliveryOutcome::Poisoned { preview };
            }
        };

        let enriched = self.rule_engine.apply(record);
        let payload = match serde_json::to_vec(&enriched) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(target: "ingest", "failed to serialise enriched event: {e}");
                let _ = self.broker.ack(&delivery).await;
                return DeliveryOutcome::Poisoned {
                    preview: "serialisation failure".to_string(),
                };
            }
        };

        match self.broker.publish(enriched_subject, &payload).await {
            Ok(()) => {
                let _ = self.broker.ack(&delivery).await;
                DeliveryOutcome::Published
            }
            Err(e) => {
                warn!(target: "ingest", "publish to {enriched_subject} failed: {e}, nak-ing for redelivery");
                let _ = self.broker.nak(&delivery).await;
                DeliveryOutcome::PublishFailed
            }
        }
    }

    fn apply_outcome(&self, source: SourceKind, outcome: DeliveryOutcome, circuit: &mut QuarantineCircuit) {
        match outcome {
            DeliveryOutcome::Published | DeliveryOutcome::PublishFailed => {}
            DeliveryOutcome::Poisoned { preview } => {
                self.metrics.incr_poison(source);
                if circuit.record_poison(Instant::now()) {
                    self.metrics.quarantine_opened_total.fetch_add(1, Ordering::Relaxed);
                    warn!(target: "ingest", "quarantine circuit opened for {source:?}");
                }
                debug!(target: "ingest", "poison preview for {source:?}: {preview}");
            }
        }
    }

    async fn route_to_deadletter(&self, deadletter_subject: &str, delivery: Delivery) {
        if let Err(e) = self.broker.publish(deadletter_subject, &delivery.payload).await {
            error!(target: "ingest", "failed to dead-letter onto {deadletter_subject}: {e}");
            let _ = self.broker.nak(&delivery).await;
            return;
        }
        let _ = self.broker.ack(&delivery).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::inmemory::InMemoryBroker;
    use crate::rules::RuleSet;
    use std::time::Duration;

    fn valid_endpoint_frame() -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "event_id": "evt-1",
            "timestamp": "2026-01-01T00:00:00Z",
            "host_id": "host-a",
            "detection_type": "process",
            "evidence": {
                "process_name": "mcp-server",
                "process_hash": "abc123",
                "command_line": "mcp-server --port 3000",
                "port": 3000
            }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn valid_frame_is_enriched_and_published() {
        let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new());
        let rule_engine = Arc::new(RuleEngine::new(RuleSet::empty()));
        let metrics = Arc::new(Metrics::new());
        let supervisor = Arc::new(StreamIngestSupervisor::new(
            broker.clone(),
            rule_engine,
            metrics.clone(),
            2,
        ));

        let mut enriched_rx = broker.subscribe("enriched.endpoint").await.unwrap();
        let supervisor_task = tokio::spawn({
            let supervisor = supervisor.clone();
            async move { supervisor.run_subject(SourceKind::Endpoint).await }
        });

        // give the consumer task a moment to subscribe before publishing
        tokio::time::sleep(Duration::from_millis(20)).await;
        broker.publish("endpoint.events", &valid_endpoint_frame()).await.unwrap();

        let delivery = tokio::time::timeout(Duration::from_secs(1), enriched_rx.recv())
            .await
            .unwrap()
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&delivery.payload).unwrap();
        assert_eq!(value["record"]["event_id"], "evt-1");
        assert!(metrics.lag_ms_endpoint.load(std::sync::atomic::Ordering::Relaxed) > 0);

        supervisor_task.abort();
    }

    #[tokio::test]
    async fn malformed_frame_increments_poison_and_is_acked_not_published() {
        let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new());
        let rule_engine = Arc::new(RuleEngine::new(RuleSet::empty()));
        let metrics = Arc::new(Metrics::new());
        let supervisor = Arc::new(StreamIngestSupervisor::new(
            broker.clone(),
            rule_engine,
            metrics.clone(),
            2,
        ));

        let mut enriched_rx = broker.subscribe("enriched.endpoint").await.unwrap();
        let supervisor_task = tokio::spawn({
            let supervisor = supervisor.clone();
            async move { supervisor.run_subject(SourceKind::Endpoint).await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        broker
            .publish("endpoint.events", br#"{"event_id":"x"}"#)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            metrics.poison_total_endpoint.load(std::sync::atomic::Ordering::Relaxed),
            1
        );
        assert!(tokio::time::timeout(Duration::from_millis(50), enriched_rx.recv())
            .await
            .is_err());

        supervisor_task.abort();
    }

    #[tokio::test]
    async fn crossing_the_poison_threshold_increments_quarantine_opened_total_once() {
        let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new());
        let rule_engine = Arc::new(RuleEngine::new(RuleSet::empty()));
        let metrics = Arc::new(Metrics::new());
        let supervisor = Arc::new(StreamIngestSupervisor::new(
            broker.clone(),
            rule_engine,
            metrics.clone(),
            4,
        ));

        let supervisor_task = tokio::spawn({
            let supervisor = supervisor.clone();
            async move { supervisor.run_subject(SourceKind::Endpoint).await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        for _ in 0..105 {
            broker
                .publish("endpoint.events", br#"{"event_id":"x"}"#)
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(
            metrics.quarantine_opened_total.load(std::sync::atomic::Ordering::Relaxed),
            1
        );

        supervisor_task.abort();
    }
}
