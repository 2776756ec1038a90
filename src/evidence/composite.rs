use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A 64-char lowercase hex identity derived from
/// `sha256(host || port || manifest_hash || process_hash)`, with a fixed
/// sentinel substituted for any missing component (spec §3). This is the
/// correlator's grouping key and one of the registry lookup keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompositeIdentity(String);

const SENTINEL: &str = "-";

impl CompositeIdentity {
    pub fn new(
        host_identifier: Option<&str>,
        port: Option<u16>,
        manifest_hash: Option<&str>,
        process_hash: Option<&str>,
    ) -> Self {
        let host = host_identifier.unwrap_or(SENTINEL);
        let port = port.map(|p| p.to_string()).unwrap_or_else(|| SENTINEL.to_string());
        let manifest = manifest_hash.unwrap_or(SENTINEL);
        let process = process_hash.unwrap_or(SENTINEL);

        let mut hasher = Sha256::new();
        hasher.update(host.as_bytes());
        hasher.update(port.as_bytes());
        hasher.update(manifest.as_bytes());
        hasher.update(process.as_bytes());
        let digest = hasher.finalize();

        Self(hex::encode(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CompositeIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
