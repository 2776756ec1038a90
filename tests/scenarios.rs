//! End-to-end coverage of the six testable scenarios, wired through the
//! real broker/ingest/correlator chain rather than calling module internals
//! directly. Complements the narrower `#[cfg(test)]` coverage next to each
//! component.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use mcp_sentry_core::broker::inmemory::InMemoryBroker;
use mcp_sentry_core::broker::Broker;
use mcp_sentry_core::correlator::Correlator;
use mcp_sentry_core::evidence::Classification;
use mcp_sentry_core::ingest::StreamIngestSupervisor;
use mcp_sentry_core::judge::anthropic_provider::FixedJudgeProvider;
use mcp_sentry_core::judge::cache::InMemoryCache;
use mcp_sentry_core::judge::JudgeWorker;
use mcp_sentry_core::metrics::Metrics;
use mcp_sentry_core::registry::inmemory::InMemoryRegistry;
use mcp_sentry_core::registry::RegistryPort;
use mcp_sentry_core::rules::{RuleCorpus, RuleEngine, RuleSet};
use mcp_sentry_core::store::inmemory::InMemoryAnalyticStore;
use mcp_sentry_core::store::{AnalyticStore, DetectionOutcome};

struct Harness {
    broker: Arc<dyn Broker>,
    metrics: Arc<Metrics>,
    store: Arc<InMemoryAnalyticStore>,
    finalised_rx: tokio::sync::mpsc::Receiver<mcp_sentry_core::broker::Delivery>,
}

async fn spawn_pipeline(rule_engine: RuleEngine, judge_response: &str) -> Harness {
    let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new());
    let metrics = Arc::new(Metrics::new());
    let rule_engine = Arc::new(rule_engine);
    let registry: Arc<dyn RegistryPort> = Arc::new(InMemoryRegistry::new());
    let store = Arc::new(InMemoryAnalyticStore::new());

    // Subscribed before the pipeline starts so a detection finalised before
    // the test gets around to awaiting it still lands in this channel.
    let finalised_rx = broker.subscribe("detections.finalised").await.unwrap();

    let judge = Arc::new(JudgeWorker::new(
        Arc::new(FixedJudgeProvider::new(judge_response.to_string())),
        Arc::new(InMemoryCache::new(Duration::from_secs(60))),
        Duration::from_millis(400),
        4,
        metrics.clone(),
    ));

    let supervisor = Arc::new(StreamIngestSupervisor::new(
        broker.clone(),
        rule_engine,
        metrics.clone(),
        4,
    ));
    let correlator = Arc::new(Correlator::new(
        broker.clone(),
        registry,
        store.clone() as Arc<dyn AnalyticStore>,
        judge,
        metrics.clone(),
        Duration::from_millis(80),
        Duration::from_secs(300),
    ));

    tokio::spawn(async move { supervisor.run().await });
    tokio::spawn(async move { correlator.run().await });

    Harness { broker, metrics, store, finalised_rx }
}

async fn next_finalised(harness: &mut Harness) -> DetectionOutcome {
    let delivery = tokio::time::timeout(Duration::from_secs(2), harness.finalised_rx.recv())
        .await
        .expect("timed out waiting for a finalised detection")
        .expect("broker closed");
    serde_json::from_slice(&delivery.payload).unwrap()
}

fn endpoint_file_frame(event_id: &str, host_id: &str, manifest_hash: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "event_id": event_id,
        "timestamp": "2026-01-01T00:00:00Z",
        "host_id": host_id,
        "detection_type": "file",
        "evidence": {
            "file_path": "/opt/mcp/server.py",
            "file_hash": "abc",
            "manifest_hash": manifest_hash
        }
    }))
    .unwrap()
}

fn gateway_suspect_frame(event_id: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "event_id": event_id,
        "timestamp": "2026-01-01T00:00:00Z",
        "host_id": "host-c",
        "classification": "suspect",
        "confidence": 40,
        "reasoning": "upstream gateway flagged ambiguous traffic",
        "score_contribution": 3,
        "model_version": "gateway-v1"
    }))
    .unwrap()
}

fn network_suricata_frame(dest_port: u16) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "flow_id": "flow-9001",
        "timestamp": "2026-01-01T00:00:00Z",
        "event_type": "alert",
        "src_ip": "10.0.0.1",
        "src_port": 55000,
        "dest_ip": "10.0.0.2",
        "dest_port": dest_port,
        "proto": "TCP",
        "alert": {"signature": "MCP default port", "signature_id": 9001, "category": "policy", "severity": 2}
    }))
    .unwrap()
}

/// S1: a lone endpoint file event with no corroborating evidence and no
/// registry hit scores 11 (endpoint baseline, no penalty) and closes
/// unauthorized, even though the judge (triggered because the group is
/// single-source file-only) comes back authorized — the judge adjusts
/// confidence, never the raw weight.
#[tokio::test]
async fn s1_lone_endpoint_file_event_closes_unauthorized_despite_authorized_judge() {
    let mut harness = spawn_pipeline(
        RuleEngine::empty(),
        "CLASSIFICATION: AUTHORIZED\nCONFIDENCE: 80\nREASONING: looks like a known deployment",
    )
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    harness
        .broker
        .publish("endpoint.events", &endpoint_file_frame("s1-1", "host-a", "manifest-s1"))
        .await
        .unwrap();

    let outcome = next_finalised(&mut harness).await;
    assert_eq!(outcome.score, 11);
    assert_eq!(outcome.classification, Classification::Unauthorized);
    assert!(outcome.judge_available);
    assert_eq!(harness.store.len(), 1);
}

/// S3: a gateway-only event contributes only its own weight; the gateway's
/// own verdict is not a shortcut to any particular classification.
#[tokio::test]
async fn s3_gateway_only_suspect_event_is_authorized_by_weight() {
    let mut harness = spawn_pipeline(RuleEngine::empty(), "unused").await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    harness
        .broker
        .publish("gateway.events", &gateway_suspect_frame("s3-1"))
        .await
        .unwrap();

    let outcome = next_finalised(&mut harness).await;
    assert_eq!(outcome.score, 3);
    assert_eq!(outcome.classification, Classification::Authorized);
    assert!(!outcome.judge_available); // gateway-only group never wants the judge
}

/// S4: 100 malformed frames within the poison window open the quarantine
/// circuit; the 101st frame never reaches the parser and is routed straight
/// to the dead-letter subject instead.
#[tokio::test]
async fn s4_poison_quarantine_opens_and_deadletters_the_next_frame() {
    let mut harness = spawn_pipeline(RuleEngine::empty(), "unused").await;
    let mut deadletter_rx = harness.broker.subscribe("deadletter.endpoint").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    for _ in 0..100 {
        harness
            .broker
            .publish("endpoint.events", br#"{"event_id":"x"}"#)
            .await
            .unwrap();
    }
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(harness.metrics.poison_total_endpoint.load(Ordering::Relaxed), 100);

    harness
        .broker
        .publish("endpoint.events", br#"{"event_id":"y"}"#)
        .await
        .unwrap();
    let deadlettered = tokio::time::timeout(Duration::from_secs(1), deadletter_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(deadlettered.payload, br#"{"event_id":"y"}"#);
}

/// S6: a rule attempting to overwrite `event_id` via enrichment never
/// touches the protected field, but its `score_bonus` still lands in the
/// final detection's score and `matched_rules` list.
#[tokio::test]
async fn s6_rule_enrichment_cannot_override_protected_fields_but_still_scores() {
    let corpus = RuleCorpus::parse(
        r#"
rules:
  - id: R1
    name: "MCP default port"
    severity: medium
    tags: ["mcp-default-port"]
    conditions:
      - field: details.dest_port
        operator: equals
        value: 3000
    enrichment:
      tag: "mcp-default-port"
      score_bonus: 2
      event_id: "HACK"
"#,
    )
    .unwrap();
    let mut harness = spawn_pipeline(RuleEngine::new(RuleSet::compile(corpus)), "unused").await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    harness
        .broker
        .publish("network.events", &network_suricata_frame(3000))
        .await
        .unwrap();

    let outcome = next_finalised(&mut harness).await;
    assert_eq!(outcome.score, 5); // 3 baseline + 2 bonus
    assert_eq!(outcome.classification, Classification::Suspect);
    assert_eq!(outcome.matched_rules.len(), 1);
    assert_eq!(outcome.matched_rules[0].rule_id, "R1");
    assert_eq!(outcome.evidence[0].record.event_id, "flow-9001"); // not overwritten to "HACK"
    assert_eq!(
        outcome.evidence[0].enrichment.get("tag").and_then(|v| v.as_str()),
        Some("mcp-default-port")
    );
}
