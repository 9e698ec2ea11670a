use std::sync::Arc;

use tracing::instrument;

use crate::error::StoreError;
use crate::traits::RecordStore;
use crate::types::InventoryRecord;
use crate::types::Timestamp;

/// Finds primary records the replica hasn't seen yet.
#[derive(Debug, Clone)]
pub struct ChangeDetector {
    primary: Arc<dyn RecordStore>,
}

impl ChangeDetector {
    pub fn new(primary: Arc<dyn RecordStore>) -> Self {
        Self { primary }
    }

    /// Records with `last_updated > watermark`, oldest first. A snapshot: later writes are left for the next cycle.
    #[instrument(level = "debug", skip(self))]
    pub async fn detect_changes(&self, watermark: Timestamp) -> Result<Vec<InventoryRecord>, StoreError> {
        self.primary.changed_since(watermark).await
    }
}
