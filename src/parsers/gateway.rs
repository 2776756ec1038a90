use serde_json::Value;

use super::{decode_object, parse_timestamp, require_field, require_str, Parser};
use crate::error::ParseError;
use crate::evidence::{
    baseline_score, Classification, CompositeKeyHint, EvidenceDetails, EvidenceRecord, EvidenceType, SourceKind,
};

/// Parses `{event_id, timestamp, detection_id, classification, confidence,
/// reasoning, score_contribution, model_version, host_id}` frames from
/// `gateway.events` (spec §6). The gateway classifier's own
/// `score_contribution` is accepted as supplied rather than recomputed,
/// since the gateway may itself be the judge worker re-publishing a verdict.
pub struct GatewayParser;

impl Parser for GatewayParser {
    fn source_kind(&self) -> SourceKind {
        SourceKind::Gateway
    }

    fn parse(&self, bytes: &[u8]) -> Result<EvidenceRecord, ParseError> {
        let obj = decode_object(bytes)?;

        let event_id = require_str(&obj, "event_id")?.to_string();
        let ts = parse_timestamp(require_field(&obj, "timestamp")?)?;
        let host_id = require_str(&obj, "host_id")?.to_string();
        let classification_raw = require_str(&obj, "classification")?;
        let classification = Classification::from_str_loose(classification_raw)
            .ok_or_else(|| ParseError::SchemaViolation("classification".to_string()))?;
        let confidence = require_field(&obj, "confidence")?
            .as_f64()
            .ok_or_else(|| ParseError::SchemaViolation("confidence".to_string()))?
            .clamp(0.0, 100.0)
            .round() as u8;
        let reasoning = require_str(&obj, "reasoning")?.to_string();
        let model_version = require_str(&obj, "model_version")?.to_string();

        let score_contribution = obj
            .get("score_contribution")
            .and_then(Value::as_i64)
            .unwrap_or_else(|| baseline_score(EvidenceType::Gateway));

        Ok(EvidenceRecord {
            event_id,
            source_kind: SourceKind::Gateway,
            source_label: "gateway.judge".to_string(),
            ts,
            host_identifier: host_id,
            score_contribution,
            details: EvidenceDetails::Gateway {
                classification,
                confidence,
                reasoning,
                model_version,
            },
            composite_key_hint: Some(CompositeKeyHint::default()),
            snippet: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> Value {
        serde_json::json!({
            "event_id": "gw-1",
            "timestamp": "2026-01-01T00:00:00Z",
            "detection_id": "det-1",
            "classification": "SUSPECT",
            "confidence": 42,
            "reasoning": "unclear legitimacy",
            "score_contribution": 3,
            "model_version": "claude-3-5-sonnet-20241022",
            "host_id": "host-a"
        })
    }

    #[test]
    fn parses_valid_gateway_event_case_insensitively() {
        let bytes = serde_json::to_vec(&sample_json()).unwrap();
        let record = GatewayParser.parse(&bytes).unwrap();
        assert_eq!(record.score_contribution, 3);
        match record.details {
            EvidenceDetails::Gateway { classification, .. } => {
                assert_eq!(classification, Classification::Suspect)
            }
            _ => panic!("expected gateway details"),
        }
    }

    #[test]
    fn invalid_classification_is_schema_violation() {
        let mut json = sample_json();
        json["classification"] = Value::String("not-a-verdict".to_string());
        let bytes = serde_json::to_vec(&json).unwrap();
        assert!(matches!(
            GatewayParser.parse(&bytes),
            Err(ParseError::SchemaViolation(_))
        ));
    }

    #[test]
    fn confidence_is_clamped_to_100() {
        let mut json = sample_json();
        json["confidence"] = Value::from(250u64);
        let bytes = serde_json::to_vec(&json).unwrap();
        let record = GatewayParser.parse(&bytes).unwrap();
        match record.details {
            EvidenceDetails::Gateway { confidence, .. } => assert_eq!(confidence, 100),
            _ => panic!("expected gateway details"),
        }
    }

    #[test]
    fn fractional_confidence_is_rounded_not_rejected() {
        let mut json = sample_json();
        json["confidence"] = Value::from(92.5);
        let bytes = serde_json::to_vec(&json).unwrap();
        let record = GatewayParser.parse(&bytes).unwrap();
        match record.details {
            EvidenceDetails::Gateway { confidence, .. } => assert_eq!(confidence, 93),
            _ => panic!("expected gateway details"),
        }
    }
}
