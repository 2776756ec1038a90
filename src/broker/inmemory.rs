use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{Broker, Delivery};
use crate::error::BrokerError;

const CHANNEL_CAPACITY: usize = 1024;

struct Subject {
    tx: mpsc::Sender<Delivery>,
    next_delivery_id: AtomicU64,
}

/// An in-process `Broker` built on `tokio::sync::mpsc`, in the same spirit
/// as this codebase's `stream::Broadcaster` (a single in-memory fan-out
/// point other components subscribe to). Durability is modelled by a
/// monotonic per-subject delivery counter; redelivery on `nak` re-enqueues
/// the same payload rather than dropping it. This is the default and test
/// port — a deployment wires a different `Broker` backed by a real durable
/// bus without touching any of C1–C6.
#[derive(Default)]
pub struct InMemoryBroker {
    subjects: Mutex<HashMap<String, Arc<Subject>>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn subject(&self, name: &str) -> Arc<Subject> {
        let mut subjects = self.subjects.lock();
        subjects
            .entry(name.to_string())
            .or_insert_with(|| {
                let (tx, _rx) = mpsc::channel(CHANNEL_CAPACITY);
                Arc::new(Subject {
                    tx,
                    next_delivery_id: AtomicU64::new(1),
                })
            })
            .clone()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn publish(&self, subject_name: &str, payload: &[u8]) -> Result<(), BrokerError> {
        if subject_name.is_empty() {
            return Err(BrokerError::UnknownSubject(subject_name.to_string()));
        }
        let subject = self.subject(subject_name);
        let delivery_id = subject.next_delivery_id.fetch_add(1, Ordering::SeqCst);
        subject
            .tx
            .send(Delivery {
                subject: subject_name.to_string(),
                payload: payload.to_vec(),
                delivery_id,
            })
            .await
            .map_err(|e| BrokerError::Transient(e.to_string()))
    }

    async fn subscribe(&self, subject_name: &str) -> Result<mpsc::Receiver<Delivery>, BrokerError> {
        if subject_name.is_empty() {
            return Err(BrokerError::UnknownSubject(subject_name.to_string()));
        }
        // A fresh `(tx, rx)` pair per subscription, re-registered into the
        // shared map so `publish` always has somewhere to send: mirrors a
        // single-writer-per-subject durable consumer group.
        let mut subjects = self.subjects.lock();
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let next_delivery_id = subjects
            .get(subject_name)
            .map(|s| s.next_delivery_id.load(Ordering::SeqCst))
            .unwrap_or(1);
        subjects.insert(
            subject_name.to_string(),
            Arc::new(Subject {
                tx,
                next_delivery_id: AtomicU64::new(next_delivery_id),
            }),
        );
        Ok(rx)
    }

    async fn ack(&self, _delivery: &Delivery) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn nak(&self, delivery: &Delivery) -> Result<(), BrokerError> {
        let subject = self.subject(&delivery.subject);
        subject
            .tx
            .send(delivery.clone())
            .await
            .map_err(|e| BrokerError::Transient(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_then_subscribe_receives_payload_in_order() {
        let broker = InMemoryBroker::new();
        let mut rx = broker.subscribe("endpoint.events").await.unwrap();
        broker.publish("endpoint.events", b"one").await.unwrap();
        broker.publish("endpoint.events", b"two").await.unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.payload, b"one");
        assert_eq!(second.payload, b"two");
    }

    #[tokio::test]
    async fn nak_redelivers_the_message() {
        let broker = InMemoryBroker::new();
        let mut rx = broker.subscribe("network.events").await.unwrap();
        broker.publish("network.events", b"payload").await.unwrap();
        let delivery = rx.recv().await.unwrap();

        broker.nak(&delivery).await.unwrap();
        let redelivered = rx.recv().await.unwrap();
        assert_eq!(redelivered.payload, b"payload");
    }

    #[tokio::test]
    async fn empty_subject_name_is_rejected_on_publish_and_subscribe() {
        let broker = InMemoryBroker::new();
        assert!(matches!(
            broker.publish("", b"x").await,
            Err(BrokerError::UnknownSubject(_))
        ));
        assert!(matches!(
            broker.subscribe("").await,
            Err(BrokerError::UnknownSubject(_))
        ));
    }
}
