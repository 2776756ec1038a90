pub mod composite;
pub mod enriched;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use composite::CompositeIdentity;
pub use enriched::{EnrichedEvent, MatchedRule};

/// Baseline score contribution fixed by evidence type (spec §3). Rule
/// enrichment may add to the final score via `score_bonus`, but never
/// rewrites this value.
pub fn baseline_score(evidence_type: EvidenceType) -> i64 {
    match evidence_type {
        EvidenceType::File | EvidenceType::Process => 11,
        EvidenceType::Network => 3,
        EvidenceType::Gateway => 5,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Endpoint,
    Network,
    Gateway,
}

impl SourceKind {
    pub fn as_subject_suffix(self) -> &'static str {
        match self {
            SourceKind::Endpoint => "endpoint",
            SourceKind::Network => "network",
            SourceKind::Gateway => "gateway",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvidenceType {
    File,
    Process,
    Network,
    Gateway,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Authorized,
    Suspect,
    Unauthorized,
}

impl Classification {
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "authorized" => Some(Classification::Authorized),
            "suspect" => Some(Classification::Suspect),
            "unauthorized" => Some(Classification::Unauthorized),
            _ => None,
        }
    }

    pub fn judge_score_contribution(self) -> i64 {
        match self {
            Classification::Unauthorized => 5,
            Classification::Suspect => 3,
            Classification::Authorized => 0,
        }
    }
}

/// Discriminated evidence payload, keyed on `evidence_type`. Replaces the
/// free-form nested map the rule engine's source used with a real sum type;
/// parsers construct the matching variant directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "evidence_type", rename_all = "lowercase")]
pub enum EvidenceDetails {
    File {
        file_path: String,
        file_hash: String,
        manifest_hash: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        port: Option<u16>,
    },
    Process {
        process_name: String,
        process_hash: String,
        command_line: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        port: Option<u16>,
    },
    Network {
        src_ip: String,
        src_port: u16,
        dest_ip: String,
        dest_port: u16,
        proto: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        service: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        conn_state: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        signature_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        severity: Option<String>,
    },
    Gateway {
        classification: Classification,
        confidence: u8,
        reasoning: String,
        model_version: String,
    },
}

impl EvidenceDetails {
    pub fn evidence_type(&self) -> EvidenceType {
        match self {
            EvidenceDetails::File { .. } => EvidenceType::File,
            EvidenceDetails::Process { .. } => EvidenceType::Process,
            EvidenceDetails::Network { .. } => EvidenceType::Network,
            EvidenceDetails::Gateway { .. } => EvidenceType::Gateway,
        }
    }

    pub fn port(&self) -> Option<u16> {
        match self {
            EvidenceDetails::File { port, .. } => *port,
            EvidenceDetails::Process { port, .. } => *port,
            EvidenceDetails::Network { dest_port, .. } => Some(*dest_port),
            EvidenceDetails::Gateway { .. } => None,
        }
    }

    pub fn manifest_hash(&self) -> Option<&str> {
        match self {
            EvidenceDetails::File { manifest_hash, .. } => Some(manifest_hash.as_str()),
            _ => None,
        }
    }

    pub fn process_hash(&self) -> Option<&str> {
        match self {
            EvidenceDetails::Process { process_hash, .. } => Some(process_hash.as_str()),
            _ => None,
        }
    }
}

/// A composite-key grouping hint a parser or upstream producer may attach.
/// The correlator prefers this when present; otherwise it derives the
/// `CompositeIdentity` itself from the fields available on the record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompositeKeyHint {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_hash: Option<String>,
}

/// Canonical normalised form emitted by every parser (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub event_id: String,
    pub source_kind: SourceKind,
    pub source_label: String,
    pub ts: DateTime<Utc>,
    pub host_identifier: String,
    pub score_contribution: i64,
    pub details: EvidenceDetails,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub composite_key_hint: Option<CompositeKeyHint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<Vec<u8>>,
}

impl EvidenceRecord {
    pub fn evidence_type(&self) -> EvidenceType {
        self.details.evidence_type()
    }

    /// Derives this record's `CompositeIdentity`: the hint if present, else
    /// the canonical construction over whatever fields are available.
    pub fn composite_identity(&self) -> CompositeIdentity {
        if let Some(hint) = &self.composite_key_hint {
            return CompositeIdentity::new(
                Some(hint.host_identifier.as_deref().unwrap_or(&self.host_identifier)),
                hint.port.or_else(|| self.details.port()),
                hint.manifest_hash.as_deref().or_else(|| self.details.manifest_hash()),
                hint.process_hash.as_deref().or_else(|| self.details.process_hash()),
            );
        }
        CompositeIdentity::new(
            Some(&self.host_identifier),
            self.details.port(),
            self.details.manifest_hash(),
            self.details.process_hash(),
        )
    }
}

/// Truncates `bytes` to at most `limit` bytes without splitting a UTF-8
/// codepoint. Used for the snippet policy (parsers, ≤1024 bytes) and for
/// the judge's per-evidence-block prompt truncation (≤500 bytes).
pub fn truncate_utf8_safe(bytes: &[u8], limit: usize) -> &[u8] {
    if bytes.len() <= limit {
        return bytes;
    }
    let mut end = limit;
    // Back off until `end` does not land inside a multi-byte codepoint.
    // A continuation byte has the high bits `10xxxxxx`.
    while end > 0 && (bytes[end] & 0b1100_0000) == 0b1000_0000 {
        end -= 1;
    }
    &bytes[..end]
}
