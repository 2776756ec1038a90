pub mod scorer;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{error, info, warn};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::broker::Broker;
use crate::evidence::{CompositeIdentity, EnrichedEvent, EvidenceType, SourceKind};
use crate::judge::JudgeWorker;
use crate::metrics::Metrics;
use crate::registry::RegistryPort;
use crate::store::{AnalyticStore, DetectionOutcome};

const STORE_WRITE_RETRIES: u32 = 3;

/// The transient aggregation over a short window of enriched events sharing
/// a `CompositeIdentity` (spec §3, §4.6).
struct CorrelationGroup {
    composite_id: CompositeIdentity,
    created_at: chrono::DateTime<chrono::Utc>,
    opened_at: Instant,
    last_seen: Instant,
    members: Vec<EnrichedEvent>,
    sources_seen: HashSet<SourceKind>,
}

impl CorrelationGroup {
    fn new(composite_id: CompositeIdentity, first: EnrichedEvent, now: Instant) -> Self {
        let mut sources_seen = HashSet::new();
        sources_seen.insert(first.record.source_kind);
        Self {
            composite_id,
            created_at: Utc::now(),
            opened_at: now,
            last_seen: now,
            members: vec![first],
            sources_seen,
        }
    }

    fn push(&mut self, member: EnrichedEvent, now: Instant) {
        self.sources_seen.insert(member.record.source_kind);
        self.members.push(member);
        self.last_seen = now;
    }

    fn is_quiescent(&self, now: Instant, quiescence: Duration) -> bool {
        now.duration_since(self.last_seen) >= quiescence
    }

    fn past_hard_ceiling(&self, now: Instant, ceiling: Duration) -> bool {
        now.duration_since(self.opened_at) >= ceiling
    }

    /// Whether this group should trigger a judge inference on close: exactly
    /// one source seen, and it is endpoint evidence with no supporting
    /// evidence besides file detections (spec §4.6, scenario S1).
    fn wants_judge(&self) -> bool {
        self.sources_seen.len() == 1
            && self.sources_seen.contains(&SourceKind::Endpoint)
            && self
                .members
                .iter()
                .all(|m| m.record.evidence_type() == EvidenceType::File)
    }
}

/// Consumes all three `enriched.*` subjects, groups events by composite
/// identity, and closes groups on quiescence or hard ceiling into a final
/// `DetectionOutcome` (spec §4.6).
pub struct Correlator {
    broker: Arc<dyn Broker>,
    registry: Arc<dyn RegistryPort>,
    store: Arc<dyn AnalyticStore>,
    judge: Arc<JudgeWorker>,
    metrics: Arc<Metrics>,
    quiescence: Duration,
    hard_ceiling: Duration,
    groups: Mutex<HashMap<String, CorrelationGroup>>,
}

impl Correlator {
    pub fn new(
        broker: Arc<dyn Broker>,
        registry: Arc<dyn RegistryPort>,
        store: Arc<dyn AnalyticStore>,
        judge: Arc<JudgeWorker>,
        metrics: Arc<Metrics>,
        quiescence: Duration,
        hard_ceiling: Duration,
    ) -> Self {
        Self {
            broker,
            registry,
            store,
            judge,
            metrics,
            quiescence,
            hard_ceiling,
            groups: Mutex::new(HashMap::new()),
        }
    }

    /// Spawns a consumer per `enriched.*` subject plus the windowing sweep,
    /// and awaits them all.
    pub async fn run(self: Arc<Self>) {
        let sources = [SourceKind::Endpoint, SourceKind::Network, SourceKind::Gateway];
        let mut handles = Vec::with_capacity(sources.len() + 1);
        for source in sources {
            let this = self.clone();
            handles.push(tokio::spawn(async move { this.consume_subject(source).await }));
        }
        let this = self.clone();
        handles.push(tokio::spawn(async move { this.sweep_loop().await }));

        for handle in handles {
            if let Err(e) = handle.await {
                error!(target: "correlator", "a correlator task panicked: {e}");
            }
        }
    }

    async fn consume_subject(self: Arc<Self>, source: SourceKind) {
        let subject = format!("enriched.{}", source.as_subject_suffix());
        let mut rx = match self.broker.subscribe(&subject).await {
            Ok(rx) => rx,
            Err(e) => {
                error!(target: "correlator", "failed to subscribe to {subject}: {e}");
                return;
            }
        };

        while let Some(delivery) = rx.recv().await {
            match serde_json::from_slice::<EnrichedEvent>(&delivery.payload) {
                Ok(enriched) => self.ingest(enriched),
                Err(e) => warn!(target: "correlator", "dropping malformed enriched event on {subject}: {e}"),
            }
            let _ = self.broker.ack(&delivery).await;
        }
    }

    fn ingest(&self, enriched: EnrichedEvent) {
        let composite_id = enriched.record.composite_identity();
        let key = composite_id.as_str().to_string();
        let now = Instant::now();

        let mut groups = self.groups.lock();
        groups
            .entry(key)
            .and_modify(|g| g.push(enriched.clone(), now))
            .or_insert_with(|| CorrelationGroup::new(composite_id, enriched, now));
    }

    /// Force-closes every currently open group regardless of quiescence
    /// (graceful-shutdown step "b", spec §5: "finalise or flush all open
    /// correlation groups").
    pub async fn flush_all(&self) {
        let ready: Vec<CorrelationGroup> = self.groups.lock().drain().map(|(_, g)| g).collect();
        for group in ready {
            self.close_group(group).await;
        }
    }

    /// Periodically checks every open group for quiescence or hard-ceiling
    /// expiry and closes the ones that have reached it.
    async fn sweep_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(Duration::from_millis(500));
        loop {
            interval.tick().await;
            let ready: Vec<(String, CorrelationGroup)> = {
                let mut groups = self.groups.lock();
                let now = Instant::now();
                let ready_keys: Vec<String> = groups
                    .iter()
                    .filter(|(_, g)| g.is_quiescent(now, self.quiescence) || g.past_hard_ceiling(now, self.hard_ceiling))
                    .map(|(k, _)| k.clone())
                    .collect();
                ready_keys
                    .into_iter()
                    .filter_map(|k| groups.remove(&k).map(|g| (k, g)))
                    .collect()
            };

            for (_, group) in ready {
                self.close_group(group).await;
            }
        }
    }

    async fn close_group(&self, mut group: CorrelationGroup) {
        let judge_requested = group.wants_judge();
        let mut judge_available = false;

        if judge_requested {
            let bundle: Vec<_> = group.members.iter().map(|m| m.record.clone()).collect();
            let verdict = self.judge.classify(&bundle).await;
            judge_available = true;
            let synthetic = EnrichedEvent::unmatched(crate::evidence::EvidenceRecord {
                event_id: Uuid::new_v4().to_string(),
                source_kind: SourceKind::Gateway,
                source_label: "judge.synthetic".to_string(),
                ts: Utc::now(),
                host_identifier: group
                    .members
                    .first()
                    .map(|m| m.record.host_identifier.clone())
                    .unwrap_or_default(),
                score_contribution: verdict.score_contribution(),
                details: crate::evidence::EvidenceDetails::Gateway {
                    classification: verdict.classification,
                    confidence: verdict.confidence,
                    reasoning: verdict.reasoning,
                    model_version: "judge-worker".to_string(),
                },
                composite_key_hint: Some(crate::evidence::CompositeKeyHint::default()),
                snippet: None,
            });
            group.push(synthetic, Instant::now());
        }

        let (host_id_hash, port, manifest_hash) = identity_hints(&group);
        let registry_match = match self
            .registry
            .lookup(Some(&group.composite_id), host_id_hash.as_deref(), port, manifest_hash.as_deref())
            .await
        {
            Ok(m) => m,
            Err(e) => {
                self.metrics.registry_unavailable_total.fetch_add(1, Ordering::Relaxed);
                warn!(target: "correlator", "registry lookup failed, treating as no-match: {e}");
                None
            }
        };
        let registry_matched = registry_match.is_some();

        let final_score = scorer::score(&group.members, registry_matched);
        let classification = scorer::classify(final_score);

        let matched_rules = group
            .members
            .iter()
            .flat_map(|m| m.matched_rules.clone())
            .collect();

        let outcome = DetectionOutcome {
            detection_id: Uuid::new_v4().to_string(),
            composite_id: group.composite_id.as_str().to_string(),
            window_open_ts: group.created_at,
            ts: Utc::now(),
            host_id_hash: host_id_hash.unwrap_or_default(),
            score: final_score,
            classification,
            evidence: group.members,
            registry_matched,
            judge_available,
            matched_rules,
        };

        self.finalize(outcome).await;
    }

    async fn finalize(&self, outcome: DetectionOutcome) {
        let mut attempt = 0;
        loop {
            match self.store.write(&outcome).await {
                Ok(()) => break,
                Err(e) => {
                    attempt += 1;
                    self.metrics.store_write_failed_total.fetch_add(1, Ordering::Relaxed);
                    if attempt >= STORE_WRITE_RETRIES {
                        error!(target: "correlator", "analytic store write exhausted retries: {e}");
                        let payload = serde_json::to_vec(&outcome).unwrap_or_default();
                        let _ = self.broker.publish("deadletter.detections", &payload).await;
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(50 * attempt as u64)).await;
                }
            }
        }

        if let Ok(payload) = serde_json::to_vec(&outcome) {
            let _ = self.broker.publish("detections.finalised", &payload).await;
        }
        self.metrics.detections_finalised_total.fetch_add(1, Ordering::Relaxed);
        info!(
            target: "correlator",
            "closed group {} score={} classification={:?}",
            outcome.composite_id, outcome.score, outcome.classification
        );
    }
}

/// Derives the registry lookup hints from a group's members: the first
/// available port and manifest hash across members, and a sha256 hash of
/// the group's host identifier (the registry stores hashed host identities,
/// never raw hostnames).
fn identity_hints(group: &CorrelationGroup) -> (Option<String>, Option<u16>, Option<String>) {
    let host_id_hash = group.members.first().map(|m| hash_host_identifier(&m.record.host_identifier));
    let port = group.members.iter().find_map(|m| m.record.details.port());
    let manifest_hash = group
        .members
        .iter()
        .find_map(|m| m.record.details.manifest_hash().map(str::to_string));
    (host_id_hash, port, manifest_hash)
}

fn hash_host_identifier(host_identifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(host_identifier.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::inmemory::InMemoryBroker;
    use crate::evidence::{CompositeKeyHint, EvidenceDetails};
    use crate::judge::anthropic_provider::FixedJudgeProvider;
    use crate::judge::cache::InMemoryCache;
    use crate::registry::inmemory::InMemoryRegistry;
    use crate::registry::{RegistryMatch, RegistryStatus};
    use crate::store::inmemory::InMemoryAnalyticStore;

    fn endpoint_file_event(manifest_hash: &str) -> EnrichedEvent {
        EnrichedEvent::unmatched(crate::evidence::EvidenceRecord {
            event_id: "e1".to_string(),
            source_kind: SourceKind::Endpoint,
            source_label: "endpoint.scanner".to_string(),
            ts: Utc::now(),
            host_identifier: "host-a".to_string(),
            score_contribution: 11,
            details: EvidenceDetails::File {
                file_path: "/opt/mcp/server.py".to_string(),
                file_hash: "abc".to_string(),
                manifest_hash: manifest_hash.to_string(),
                port: Some(3000),
            },
            composite_key_hint: Some(CompositeKeyHint::default()),
            snippet: None,
        })
    }

    fn network_event_for(composite_id: &CompositeIdentity) -> EnrichedEvent {
        let mut e = EnrichedEvent::unmatched(crate::evidence::EvidenceRecord {
            event_id: "e2".to_string(),
            source_kind: SourceKind::Network,
            source_label: "network.zeek".to_string(),
            ts: Utc::now(),
            host_identifier: "host-a".to_string(),
            score_contribution: 3,
            details: EvidenceDetails::Network {
                src_ip: "10.0.0.1".to_string(),
                src_port: 55000,
                dest_ip: "10.0.0.2".to_string(),
                dest_port: 3000,
                proto: "tcp".to_string(),
                service: None,
                conn_state: None,
                signature_id: None,
                signature: None,
                severity: None,
            },
            composite_key_hint: Some(CompositeKeyHint::default()),
            snippet: None,
        });
        e.record.composite_key_hint = Some(CompositeKeyHint {
            host_identifier: Some("host-a".to_string()),
            port: Some(3000),
            manifest_hash: Some("H".to_string()),
            process_hash: None,
        });
        let _ = composite_id;
        e
    }

    fn build_correlator() -> (
        Arc<Correlator>,
        Arc<InMemoryBroker>,
        Arc<InMemoryRegistry>,
        Arc<InMemoryAnalyticStore>,
    ) {
        let broker = Arc::new(InMemoryBroker::new());
        let registry = Arc::new(InMemoryRegistry::new());
        let store = Arc::new(InMemoryAnalyticStore::new());
        let metrics = Arc::new(Metrics::new());
        let judge = Arc::new(JudgeWorker::new(
            Arc::new(FixedJudgeProvider::new(
                "CLASSIFICATION: AUTHORIZED\nCONFIDENCE: 80\nREASONING: matches known deployment",
            )),
            Arc::new(InMemoryCache::new(Duration::from_secs(60))),
            Duration::from_millis(400),
            5,
            metrics.clone(),
        ));

        let correlator = Arc::new(Correlator::new(
            broker.clone() as Arc<dyn Broker>,
            registry.clone() as Arc<dyn RegistryPort>,
            store.clone() as Arc<dyn AnalyticStore>,
            judge,
            metrics,
            Duration::from_millis(50),
            Duration::from_secs(300),
        ));
        (correlator, broker, registry, store)
    }

    #[tokio::test]
    async fn s1_single_endpoint_file_event_triggers_judge_and_closes_unauthorized_by_weight() {
        let (correlator, _broker, _registry, store) = build_correlator();
        correlator.ingest(endpoint_file_event("H"));

        let group = {
            let mut groups = correlator.groups.lock();
            let group = groups.drain().next().unwrap().1;
            group
        };
        assert!(group.wants_judge());
        correlator.close_group(group).await;

        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn s2_endpoint_plus_network_with_registry_match_is_suspect() {
        let (correlator, _broker, registry, store) = build_correlator();
        let endpoint = endpoint_file_event("H");
        let composite_id = endpoint.record.composite_identity();
        registry.seed(RegistryMatch {
            composite_id: Some(composite_id.as_str().to_string()),
            host_id_hash: None,
            port: None,
            manifest_hash: None,
            status: RegistryStatus::Approved,
            expires_at: None,
        });

        correlator.ingest(endpoint);
        correlator.ingest(network_event_for(&composite_id));

        let group = {
            let mut groups = correlator.groups.lock();
            let group = groups.drain().next().unwrap().1;
            group
        };
        assert!(!group.wants_judge());
        correlator.close_group(group).await;

        assert_eq!(store.len(), 1);
    }
}
