use std::fmt::Debug;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::types::ChangeEvent;
use crate::types::FieldPatch;
use crate::types::InventoryRecord;
use crate::types::Timestamp;
use crate::types::UpsertOutcome;

/// Keyed access to one inventory table.
///
/// Both the primary and the replica are reached through this trait, so the engine never learns which backend it talks
/// to. Implementations must be safe to share between the sync cycle and concurrent webhook requests.
#[async_trait]
pub trait RecordStore: Debug + Send + Sync + 'static {
    /// Label used in log lines and error messages.
    fn name(&self) -> &str;

    async fn get(&self, vin: &str) -> Result<Option<InventoryRecord>, StoreError>;

    /// The greatest `last_updated` stored, `None` for an empty table.
    async fn max_last_updated(&self) -> Result<Option<Timestamp>, StoreError>;

    /// Every record with `last_updated` strictly greater than `watermark`, oldest first.
    async fn changed_since(&self, watermark: Timestamp) -> Result<Vec<InventoryRecord>, StoreError>;

    /// Writes `record` unless the stored copy has the same or a newer `last_updated`.
    ///
    /// The comparison and the write happen as one step with respect to other writers of the same VIN.
    async fn upsert_if_newer(&self, record: &InventoryRecord) -> Result<UpsertOutcome, StoreError>;

    /// Sets one field of an existing record and re-stamps it.
    ///
    /// The new `last_updated` is `max(stamp, previous + 1µs)`. Returns the record as stored afterwards or `None` when no
    /// record with this VIN exists.
    async fn apply_patch(
        &self,
        vin: &str,
        patch: FieldPatch,
        stamp: Timestamp,
    ) -> Result<Option<InventoryRecord>, StoreError>;

    /// Unconditional insert-or-replace. This is how writers outside the engine reach a store.
    async fn put(&self, record: &InventoryRecord) -> Result<(), StoreError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// The subscriber is alive but can't take the event right now.
    Dropped,
    /// The subscriber went away and must be forgotten.
    Gone,
}

/// A real-time listener. Delivery must never block the caller.
pub trait Subscriber: Debug + Send + Sync + 'static {
    fn deliver(&self, event: &ChangeEvent) -> Delivery;
}
