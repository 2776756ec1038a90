pub mod inmemory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::evidence::{Classification, EnrichedEvent, MatchedRule};

/// Final emitted record for a closed `CorrelationGroup` (spec §6). Published
/// on `detections.finalised` and written once, idempotently, to the
/// analytic store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionOutcome {
    pub detection_id: String,
    pub composite_id: String,
    pub window_open_ts: DateTime<Utc>,
    pub ts: DateTime<Utc>,
    pub host_id_hash: String,
    pub score: i64,
    pub classification: Classification,
    pub evidence: Vec<EnrichedEvent>,
    pub registry_matched: bool,
    pub judge_available: bool,
    pub matched_rules: Vec<MatchedRule>,
}

impl DetectionOutcome {
    /// The analytic store's idempotence key (spec §4.6): a replayed group
    /// finalisation overwrites the same row rather than duplicating it.
    pub fn idempotence_key(&self) -> String {
        format!("{}||{}", self.composite_id, self.window_open_ts.to_rfc3339())
    }
}

/// Analytic-store write port (spec §4.6, §7: `store_write_failed` retries
/// with backoff up to 3 attempts, then dead-letters on exhaustion — that
/// retry policy lives in the correlator, which owns the call site; this
/// trait only has to guarantee that writing the same idempotence key twice
/// overwrites instead of duplicating).
#[async_trait]
pub trait AnalyticStore: Send + Sync {
    async fn write(&self, outcome: &DetectionOutcome) -> Result<(), StoreError>;

    async fn get(&self, idempotence_key: &str) -> Result<Option<DetectionOutcome>, StoreError>;
}
