use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::EvidenceRecord;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchedRule {
    pub rule_id: String,
    pub name: String,
    pub severity: crate::rules::Severity,
    pub tags: Vec<String>,
}

/// An `EvidenceRecord` plus everything the rule engine attached to it.
/// `enrichment` holds fields the rule corpus adds (e.g. `score_bonus`,
/// free-form tags); it can never contain the five protected keys guarded by
/// `rules::RuleEngine::apply`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedEvent {
    pub record: EvidenceRecord,
    pub matched_rules: Vec<MatchedRule>,
    pub enrichment: BTreeMap<String, Value>,
    pub enrichment_applied: bool,
}

impl EnrichedEvent {
    pub fn unmatched(record: EvidenceRecord) -> Self {
        Self {
            record,
            matched_rules: Vec::new(),
            enrichment: BTreeMap::new(),
            enrichment_applied: false,
        }
    }

    /// Sum of this event's baseline `score_contribution` and any
    /// `score_bonus` fields its matched rules applied.
    pub fn total_score_contribution(&self) -> i64 {
        let bonus = self
            .enrichment
            .get("score_bonus")
            .and_then(Value::as_i64)
            .unwrap_or(0);
        self.record.score_contribution + bonus
    }
}
