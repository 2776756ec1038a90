pub mod endpoint;
pub mod gateway;
pub mod network;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::error::ParseError;
use crate::evidence::{EvidenceRecord, SourceKind};

/// A pure decode function, no I/O, no shared state (spec §4.1). One
/// implementation per `source_kind`.
pub trait Parser {
    fn source_kind(&self) -> SourceKind;
    fn parse(&self, bytes: &[u8]) -> Result<EvidenceRecord, ParseError>;
}

/// Dispatches a raw frame to the parser registered for `source_kind`.
pub fn parse_for_subject(
    source_kind: SourceKind,
    bytes: &[u8],
) -> Result<EvidenceRecord, ParseError> {
    match source_kind {
        SourceKind::Endpoint => endpoint::EndpointParser.parse(bytes),
        SourceKind::Network => network::NetworkParser.parse(bytes),
        SourceKind::Gateway => gateway::GatewayParser.parse(bytes),
    }
}

pub(crate) fn decode_object(bytes: &[u8]) -> Result<Value, ParseError> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| ParseError::Malformed(e.to_string()))?;
    if !value.is_object() {
        return Err(ParseError::NotAnObject);
    }
    Ok(value)
}

pub(crate) fn require_str<'a>(obj: &'a Value, field: &str) -> Result<&'a str, ParseError> {
    obj.get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| ParseError::SchemaViolation(field.to_string()))
}

pub(crate) fn require_field<'a>(obj: &'a Value, field: &str) -> Result<&'a Value, ParseError> {
    obj.get(field)
        .ok_or_else(|| ParseError::SchemaViolation(field.to_string()))
}

/// Accepts ISO-8601 strings (`Z` mapped to UTC) and numeric epoch
/// seconds/floats. Never substitutes "now" on failure — an unparseable
/// timestamp is always `ParseError::BadTimestamp` poison (spec §9: the
/// original's `now()` fallback is explicitly forbidden here).
pub(crate) fn parse_timestamp(value: &Value) -> Result<DateTime<Utc>, ParseError> {
    if let Some(s) = value.as_str() {
        return DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| ParseError::BadTimestamp(s.to_string()));
    }
    if let Some(n) = value.as_f64() {
        let secs = n.trunc() as i64;
        let nanos = ((n.fract()) * 1_000_000_000.0).round() as u32;
        return Utc
            .timestamp_opt(secs, nanos)
            .single()
            .ok_or_else(|| ParseError::BadTimestamp(n.to_string()));
    }
    Err(ParseError::BadTimestamp(value.to_string()))
}
