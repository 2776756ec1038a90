use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use parking_lot::RwLock;

use super::{select_match, RegistryMatch, RegistryPort};
use crate::error::StoreError;
use crate::evidence::CompositeIdentity;

/// In-process registry port, in the same read-by-key spirit as this
/// codebase's `virustotal::get_cached_or_fetch` (look a row up by key,
/// return a typed optional record) with the network fetch removed since
/// this port is a pure read over rows a relational store would otherwise
/// own. Used as the default port and in tests that seed known-approved
/// instances.
#[derive(Default)]
pub struct InMemoryRegistry {
    rows: RwLock<Vec<RegistryMatch>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, row: RegistryMatch) {
        self.rows.write().push(row);
    }
}

#[async_trait]
impl RegistryPort for InMemoryRegistry {
    async fn lookup(
        &self,
        composite_id: Option<&CompositeIdentity>,
        host_id_hash: Option<&str>,
        port: Option<u16>,
        manifest_hash: Option<&str>,
    ) -> Result<Option<RegistryMatch>, StoreError> {
        let now = Utc::now();
        let rows = self.rows.read();
        let active: Vec<RegistryMatch> = rows.iter().filter(|r| r.is_active(now)).cloned().collect();
        let matched = select_match(&active, composite_id, host_id_hash, port, manifest_hash);
        if matched.is_some() {
            debug!(target: "registry", "registry hit for composite_id={composite_id:?}");
        }
        Ok(matched)
    }
}
