use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use parking_lot::RwLock;
use tracing::instrument;

use crate::error::StoreError;
use crate::traits::RecordStore;
use crate::types::successor;
use crate::types::FieldPatch;
use crate::types::InventoryRecord;
use crate::types::Timestamp;
use crate::types::UpsertOutcome;

/// A [`RecordStore`] kept entirely in memory.
///
/// Used for tests and for running the engine without a database. It can be told to fail or to stall, which is how
/// outage and timeout behavior gets exercised.
#[derive(Debug)]
pub struct MemoryStore {
    name:        String,
    records:     RwLock<HashMap<String, InventoryRecord>>,
    unavailable: AtomicBool,
    latency:     Mutex<Option<Duration>>,
}

impl MemoryStore {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name:        name.into(),
            records:     RwLock::new(HashMap::new()),
            unavailable: AtomicBool::new(false),
            latency:     Mutex::new(None),
        }
    }

    pub fn with_records<S, I>(name: S, records: I) -> Self
    where
        S: Into<String>,
        I: IntoIterator<Item = InventoryRecord>,
    {
        let store = Self::new(name);
        {
            let mut guard = store.records.write();
            for record in records {
                guard.insert(record.vin.clone(), record);
            }
        }
        store
    }

    /// While set, every call fails with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Release);
    }

    /// Delay every call by the given duration.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// All records ordered by VIN.
    pub fn snapshot(&self) -> Vec<InventoryRecord> {
        let mut records = self.records.read().values().cloned().collect::<Vec<_>>();
        records.sort_by(|a, b| a.vin.cmp(&b.vin));
        records
    }

    async fn enter(&self) -> Result<(), StoreError> {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.unavailable.load(Ordering::Acquire) {
            return Err(StoreError::Unavailable(self.name.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, vin: &str) -> Result<Option<InventoryRecord>, StoreError> {
        self.enter().await?;
        Ok(self.records.read().get(vin).cloned())
    }

    async fn max_last_updated(&self) -> Result<Option<Timestamp>, StoreError> {
        self.enter().await?;
        Ok(self.records.read().values().map(|r| r.last_updated).max())
    }

    async fn changed_since(&self, watermark: Timestamp) -> Result<Vec<InventoryRecord>, StoreError> {
        self.enter().await?;
        let mut changed = self
            .records
            .read()
            .values()
            .filter(|r| r.last_updated > watermark)
            .cloned()
            .collect::<Vec<_>>();
        changed.sort_by(|a, b| a.last_updated.cmp(&b.last_updated).then_with(|| a.vin.cmp(&b.vin)));
        Ok(changed)
    }

    #[instrument(level = "trace", skip(self, record), fields(store = %self.name, vin = %record.vin))]
    async fn upsert_if_newer(&self, record: &InventoryRecord) -> Result<UpsertOutcome, StoreError> {
        self.enter().await?;
        let mut records = self.records.write();
        match records.get_mut(&record.vin) {
            None => {
                records.insert(record.vin.clone(), record.clone());
                Ok(UpsertOutcome::Inserted)
            }
            Some(stored) if record.is_newer_than(stored) => {
                *stored = record.clone();
                Ok(UpsertOutcome::Updated)
            }
            Some(_) => Ok(UpsertOutcome::Skipped),
        }
    }

    #[instrument(level = "trace", skip(self), fields(store = %self.name))]
    async fn apply_patch(
        &self,
        vin: &str,
        patch: FieldPatch,
        stamp: Timestamp,
    ) -> Result<Option<InventoryRecord>, StoreError> {
        self.enter().await?;
        let mut records = self.records.write();
        let Some(stored) = records.get_mut(vin)
        else {
            return Ok(None);
        };
        patch.apply_to(stored);
        stored.last_updated = stamp.max(successor(&stored.last_updated));
        Ok(Some(stored.clone()))
    }

    async fn put(&self, record: &InventoryRecord) -> Result<(), StoreError> {
        self.enter().await?;
        self.records.write().insert(record.vin.clone(), record.clone());
        Ok(())
    }
}
