pub mod inmemory;

use async_trait::async_trait;

use crate::error::BrokerError;

/// A durable message handle: the raw payload plus a delivery token the
/// consumer hands back to `ack`/`nak`.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub subject: String,
    pub payload: Vec<u8>,
    pub delivery_id: u64,
}

/// The broker port this crate's core depends on. No message-broker client
/// crate is grounded anywhere in the retrieval pack this codebase draws
/// from, so the port is modelled the way every other external system here
/// is modelled: a trait a production adapter (NATS JetStream, the broker
/// this system's design was drawn from, or another durable bus) implements,
/// with an in-process default (`inmemory::InMemoryBroker`) used for local
/// runs and tests.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publishes `payload` on `subject`. Must not return `Ok` until the
    /// broker has confirmed the publish durably — callers ack their source
    /// message only after this resolves (spec §4.3: "Acknowledge the source
    /// message only after the enriched publish has been confirmed").
    async fn publish(&self, subject: &str, payload: &[u8]) -> Result<(), BrokerError>;

    /// Registers a durable consumer on `subject` and returns a receiver of
    /// its deliveries, resuming from the subject's durable cursor rather
    /// than replaying from the beginning.
    async fn subscribe(&self, subject: &str) -> Result<tokio::sync::mpsc::Receiver<Delivery>, BrokerError>;

    /// Acknowledges a delivery, advancing the durable cursor past it.
    async fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError>;

    /// Negatively acknowledges a delivery for redelivery later.
    async fn nak(&self, delivery: &Delivery) -> Result<(), BrokerError>;
}
