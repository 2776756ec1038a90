use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{AnalyticStore, DetectionOutcome};
use crate::error::StoreError;

/// In-memory analytic store, default port and the one used by correlator
/// tests. Writes key on `idempotence_key()` and overwrite in place, giving
/// the idempotence guarantee spec §4.6 requires without needing a real
/// columnar store.
#[derive(Default)]
pub struct InMemoryAnalyticStore {
    rows: Mutex<HashMap<String, DetectionOutcome>>,
}

impl InMemoryAnalyticStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AnalyticStore for InMemoryAnalyticStore {
    async fn write(&self, outcome: &DetectionOutcome) -> Result<(), StoreError> {
        self.rows.lock().insert(outcome.idempotence_key(), outcome.clone());
        Ok(())
    }

    async fn get(&self, idempotence_key: &str) -> Result<Option<DetectionOutcome>, StoreError> {
        Ok(self.rows.lock().get(idempotence_key).cloned())
    }
}
