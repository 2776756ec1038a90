use serde_json::Value;

use super::{decode_object, parse_timestamp, require_field, require_str, Parser};
use crate::error::ParseError;
use crate::evidence::{baseline_score, CompositeKeyHint, EvidenceDetails, EvidenceRecord, EvidenceType, SourceKind};

/// Disambiguates and parses Zeek `conn.log`-flavoured and Suricata
/// `eve.json`-flavoured frames from `network.events` (spec §4.1, §6).
pub struct NetworkParser;

impl Parser for NetworkParser {
    fn source_kind(&self) -> SourceKind {
        SourceKind::Network
    }

    fn parse(&self, bytes: &[u8]) -> Result<EvidenceRecord, ParseError> {
        let obj = decode_object(bytes)?;

        if obj.get("id").is_some() || obj.get("conn_state").is_some() {
            parse_zeek(&obj)
        } else if obj.get("event_type").is_some() || obj.get("alert").is_some() {
            parse_suricata(&obj)
        } else {
            Err(ParseError::UnknownSchema)
        }
    }
}

fn parse_zeek(obj: &Value) -> Result<EvidenceRecord, ParseError> {
    let event_id = require_str(obj, "uid")?.to_string();
    let ts = parse_timestamp(require_field(obj, "ts")?)?;
    let id = require_field(obj, "id")?;
    let src_ip = require_str(id, "orig_h")?.to_string();
    let dest_ip = require_str(id, "resp_h")?.to_string();
    let src_port = require_field(id, "orig_p")?
        .as_u64()
        .ok_or_else(|| ParseError::SchemaViolation("id.orig_p".to_string()))? as u16;
    let dest_port = require_field(id, "resp_p")?
        .as_u64()
        .ok_or_else(|| ParseError::SchemaViolation("id.resp_p".to_string()))? as u16;
    let proto = require_str(obj, "proto")?.to_string();

    let details = EvidenceDetails::Network {
        src_ip,
        src_port,
        dest_ip,
        dest_port,
        proto,
        service: obj.get("service").and_then(Value::as_str).map(String::from),
        conn_state: obj.get("conn_state").and_then(Value::as_str).map(String::from),
        signature_id: None,
        signature: None,
        severity: None,
    };

    Ok(finish(event_id, "network.zeek", ts, details, dest_port))
}

fn parse_suricata(obj: &Value) -> Result<EvidenceRecord, ParseError> {
    let event_id = require_str(obj, "flow_id")
        .map(|s| s.to_string())
        .or_else(|_| require_field(obj, "flow_id").map(|v| v.to_string()))?;
    let ts = parse_timestamp(require_field(obj, "timestamp")?)?;
    let src_ip = require_str(obj, "src_ip")?.to_string();
    let dest_ip = require_str(obj, "dest_ip")?.to_string();
    let src_port = require_field(obj, "src_port")?
        .as_u64()
        .ok_or_else(|| ParseError::SchemaViolation("src_port".to_string()))? as u16;
    let dest_port = require_field(obj, "dest_port")?
        .as_u64()
        .ok_or_else(|| ParseError::SchemaViolation("dest_port".to_string()))? as u16;
    let proto = require_str(obj, "proto")?.to_string();
    let alert = require_field(obj, "alert")?;

    let details = EvidenceDetails::Network {
        src_ip,
        src_port,
        dest_ip,
        dest_port,
        proto,
        service: None,
        conn_state: None,
        signature_id: alert.get("signature_id").map(|v| v.to_string()),
        signature: alert.get("signature").and_then(Value::as_str).map(String::from),
        severity: alert.get("severity").map(|v| v.to_string()),
    };

    Ok(finish(event_id, "network.suricata", ts, details, dest_port))
}

fn finish(
    event_id: String,
    source_label: &str,
    ts: chrono::DateTime<chrono::Utc>,
    details: EvidenceDetails,
    dest_port: u16,
) -> EvidenceRecord {
    let src_ip = match &details {
        EvidenceDetails::Network { src_ip, .. } => src_ip.clone(),
        _ => unreachable!(),
    };

    EvidenceRecord {
        event_id,
        source_kind: SourceKind::Network,
        source_label: source_label.to_string(),
        ts,
        host_identifier: src_ip,
        score_contribution: baseline_score(EvidenceType::Network),
        details,
        composite_key_hint: Some(CompositeKeyHint {
            port: Some(dest_port),
            manifest_hash: None,
            process_hash: None,
            host_identifier: None,
        }),
        snippet: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifies_zeek_by_id_and_conn_state() {
        let json = serde_json::json!({
            "uid": "Cabc123",
            "ts": 1_700_000_000,
            "id": {"orig_h": "10.0.0.1", "orig_p": 55000, "resp_h": "10.0.0.2", "resp_p": 3000},
            "proto": "tcp",
            "conn_state": "SF"
        });
        let bytes = serde_json::to_vec(&json).unwrap();
        let record = NetworkParser.parse(&bytes).unwrap();
        assert_eq!(record.source_label, "network.zeek");
        assert_eq!(record.details.port(), Some(3000));
    }

    #[test]
    fn identifies_suricata_by_event_type_and_alert() {
        let json = serde_json::json!({
            "flow_id": 42,
            "timestamp": "2026-01-01T00:00:00Z",
            "event_type": "alert",
            "src_ip": "10.0.0.1",
            "src_port": 55000,
            "dest_ip": "10.0.0.2",
            "dest_port": 3000,
            "proto": "TCP",
            "alert": {"signature": "MCP default port", "signature_id": 9001, "category": "policy", "severity": 2}
        });
        let bytes = serde_json::to_vec(&json).unwrap();
        let record = NetworkParser.parse(&bytes).unwrap();
        assert_eq!(record.source_label, "network.suricata");
        assert_eq!(record.details.port(), Some(3000));
    }

    #[test]
    fn frame_matching_neither_shape_is_unknown_schema() {
        let json = serde_json::json!({"something": "else"});
        let bytes = serde_json::to_vec(&json).unwrap();
        assert!(matches!(NetworkParser.parse(&bytes), Err(ParseError::UnknownSchema)));
    }
}
