use serde_json::Value;

use super::{decode_object, parse_timestamp, require_field, require_str, Parser};
use crate::error::ParseError;
use crate::evidence::{baseline_score, CompositeKeyHint, EvidenceDetails, EvidenceRecord, EvidenceType, SourceKind};

/// Parses `{event_id, timestamp, host_id, detection_type, evidence:{...}}`
/// frames from `endpoint.events` (spec §6).
pub struct EndpointParser;

impl Parser for EndpointParser {
    fn source_kind(&self) -> SourceKind {
        SourceKind::Endpoint
    }

    fn parse(&self, bytes: &[u8]) -> Result<EvidenceRecord, ParseError> {
        let obj = decode_object(bytes)?;

        let event_id = require_str(&obj, "event_id")?.to_string();
        let ts = parse_timestamp(require_field(&obj, "timestamp")?)?;
        let host_id = require_str(&obj, "host_id")?.to_string();
        let detection_type = require_str(&obj, "detection_type")?;
        let evidence = require_field(&obj, "evidence")?;

        let details = match detection_type {
            "file" => build_file_details(evidence)?,
            "process" => build_process_details(evidence)?,
            other => return Err(ParseError::SchemaViolation(format!("detection_type={other}"))),
        };

        let snippet = evidence
            .get("snippet")
            .and_then(Value::as_str)
            .map(|s| crate::evidence::truncate_utf8_safe(s.as_bytes(), 1024).to_vec());

        let manifest_hash = details.manifest_hash().map(|s| s.to_string());
        let process_hash = details.process_hash().map(|s| s.to_string());
        let port = details.port();

        Ok(EvidenceRecord {
            event_id,
            source_kind: SourceKind::Endpoint,
            source_label: "endpoint.scanner".to_string(),
            ts,
            host_identifier: host_id,
            score_contribution: baseline_score(match detection_type {
                "file" => EvidenceType::File,
                _ => EvidenceType::Process,
            }),
            details,
            composite_key_hint: Some(CompositeKeyHint {
                port,
                manifest_hash,
                process_hash,
                host_identifier: None,
            }),
            snippet,
        })
    }
}

fn build_file_details(evidence: &Value) -> Result<EvidenceDetails, ParseError> {
    Ok(EvidenceDetails::File {
        file_path: require_str(evidence, "file_path")?.to_string(),
        file_hash: require_str(evidence, "file_hash")?.to_string(),
        manifest_hash: require_str(evidence, "manifest_hash")?.to_string(),
        port: evidence.get("port").and_then(Value::as_u64).map(|p| p as u16),
    })
}

fn build_process_details(evidence: &Value) -> Result<EvidenceDetails, ParseError> {
    Ok(EvidenceDetails::Process {
        process_name: require_str(evidence, "process_name")?.to_string(),
        process_hash: require_str(evidence, "process_hash")?.to_string(),
        command_line: require_str(evidence, "command_line")?.to_string(),
        port: evidence.get("port").and_then(Value::as_u64).map(|p| p as u16),
    })
}
