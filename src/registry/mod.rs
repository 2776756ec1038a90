pub mod inmemory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::evidence::CompositeIdentity;

/// Read-only view of an approved-instance registry row (spec §3, §4.5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryMatch {
    pub composite_id: Option<String>,
    pub host_id_hash: Option<String>,
    pub port: Option<u16>,
    pub manifest_hash: Option<String>,
    pub status: RegistryStatus,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryStatus {
    Approved,
    Pending,
    Revoked,
}

impl RegistryMatch {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.status == RegistryStatus::Approved && self.expires_at.map(|e| e > now).unwrap_or(true)
    }
}

/// Read-only registry lookup port (spec §4.5). A production deployment
/// backs this with the relational registry store; `inmemory::InMemoryRegistry`
/// is the default/test port.
#[async_trait]
pub trait RegistryPort: Send + Sync {
    async fn lookup(
        &self,
        composite_id: Option<&CompositeIdentity>,
        host_id_hash: Option<&str>,
        port: Option<u16>,
        manifest_hash: Option<&str>,
    ) -> Result<Option<RegistryMatch>, StoreError>;
}

/// Applies the three-tier priority match (spec §4.5) over a slice of
/// candidate rows already filtered to approved/non-expired. Exposed
/// separately from `RegistryPort` so a store-backed implementation can reuse
/// the same selection logic over whatever subset it fetches.
pub fn select_match(
    rows: &[RegistryMatch],
    composite_id: Option<&CompositeIdentity>,
    host_id_hash: Option<&str>,
    port: Option<u16>,
    manifest_hash: Option<&str>,
) -> Option<RegistryMatch> {
    if let Some(cid) = composite_id {
        if let Some(row) = rows
            .iter()
            .find(|r| r.composite_id.as_deref() == Some(cid.as_str()))
        {
            return Some(row.clone());
        }
    }

    if let (Some(hash), Some(port), Some(manifest)) = (host_id_hash, port, manifest_hash) {
        if let Some(row) = rows.iter().find(|r| {
            r.host_id_hash.as_deref() == Some(hash)
                && r.port == Some(port)
                && r.manifest_hash.as_deref() == Some(manifest)
        }) {
            return Some(row.clone());
        }
    }

    if let Some(manifest) = manifest_hash {
        if let Some(row) = rows
            .iter()
            .find(|r| r.manifest_hash.as_deref() == Some(manifest))
        {
            return Some(row.clone());
        }
    }

    None
}
