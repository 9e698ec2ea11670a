use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;
use tracing::trace;

use crate::error::StoreError;
use crate::traits::RecordStore;
use crate::types::watermark_floor;
use crate::types::Timestamp;

/// Reports how far the replica has caught up.
///
/// Two values are kept apart. The replica's own maximum `last_updated` moves with anything written to the replica,
/// mirrored webhook updates included. The synced mark only moves when a sync cycle has copied primary records up to
/// it. Detection starts from the lower of the two, so a mirrored write stamped after an uncopied primary change cannot
/// hide that change.
#[derive(Debug)]
pub struct WatermarkTracker {
    replica: Arc<dyn RecordStore>,
    synced:  Mutex<Option<Timestamp>>,
}

impl WatermarkTracker {
    pub fn new(replica: Arc<dyn RecordStore>) -> Self {
        Self {
            replica,
            synced: Mutex::new(None),
        }
    }

    /// The replica's maximum `last_updated`, or the floor when the replica is empty.
    pub async fn current_watermark(&self) -> Result<Timestamp, StoreError> {
        let watermark = self
            .replica
            .max_last_updated()
            .await?
            .unwrap_or_else(watermark_floor);
        trace!(store = self.replica.name(), %watermark, "Current watermark");
        Ok(watermark)
    }

    /// Where change detection starts. The first call adopts the replica maximum as the synced mark unless a mirrored
    /// write pinned it earlier.
    pub async fn sync_watermark(&self) -> Result<Timestamp, StoreError> {
        let mut synced = self.synced.lock().await;
        let replica = self.current_watermark().await?;
        let mark = *synced.get_or_insert(replica);
        if mark > replica {
            debug!(%mark, %replica, "Replica is behind the synced mark");
        }
        Ok(mark.min(replica))
    }

    /// Must be awaited before anything but the sync cycle writes to the replica. Fixes the synced mark at the
    /// replica's maximum if no cycle has run yet.
    pub async fn pin(&self) -> Result<(), StoreError> {
        let mut synced = self.synced.lock().await;
        if synced.is_none() {
            let watermark = self.current_watermark().await?;
            debug!(%watermark, "Synced mark pinned ahead of the first cycle");
            *synced = Some(watermark);
        }
        Ok(())
    }

    /// Records that every primary change up to `newest` has been handled by a cycle. Never moves backwards.
    pub async fn advance(&self, newest: Timestamp) {
        let mut synced = self.synced.lock().await;
        *synced = Some(synced.map_or(newest, |mark| mark.max(newest)));
    }

    pub async fn synced_mark(&self) -> Option<Timestamp> {
        *self.synced.lock().await
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use sea_orm::prelude::Decimal;

    use super::*;
    use crate::memory::MemoryStore;
    use crate::types::from_micros;
    use crate::types::InventoryRecord;

    fn rec(vin: &str, ts: i64) -> InventoryRecord {
        InventoryRecord {
            vin:              vin.into(),
            car_model:        "Model 3".into(),
            part_name:        "Wiper".into(),
            quantity:         1,
            price:            Decimal::from_str("9.99").unwrap(),
            discount_enabled: false,
            last_updated:     from_micros(ts),
        }
    }

    #[tokio::test]
    async fn empty_replica_reports_floor() {
        let tracker = WatermarkTracker::new(Arc::new(MemoryStore::new("replica")));
        assert_eq!(tracker.current_watermark().await.unwrap(), watermark_floor());
    }

    #[tokio::test]
    async fn follows_replica_maximum() {
        let replica = Arc::new(MemoryStore::new("replica"));
        let tracker = WatermarkTracker::new(replica.clone());
        for (vin, ts) in [("vin1", 1_000_000_000_000_000), ("vin2", 1_100_000_000_000_000)] {
            replica.put(&rec(vin, ts)).await.unwrap();
        }
        assert_eq!(
            tracker.current_watermark().await.unwrap(),
            from_micros(1_100_000_000_000_000)
        );
    }

    #[tokio::test]
    async fn replica_failure_propagates() {
        let replica = Arc::new(MemoryStore::new("replica"));
        replica.set_unavailable(true);
        let tracker = WatermarkTracker::new(replica);
        assert!(matches!(
            tracker.current_watermark().await,
            Err(StoreError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn mirrored_write_does_not_move_sync_point() {
        let replica = Arc::new(MemoryStore::new("replica"));
        replica.put(&rec("vin1", 1_000_000_000_000_000)).await.unwrap();
        let tracker = WatermarkTracker::new(replica.clone());

        tracker.pin().await.unwrap();
        replica.put(&rec("vin1", 1_200_000_000_000_000)).await.unwrap();

        assert_eq!(
            tracker.current_watermark().await.unwrap(),
            from_micros(1_200_000_000_000_000)
        );
        assert_eq!(
            tracker.sync_watermark().await.unwrap(),
            from_micros(1_000_000_000_000_000)
        );

        tracker.advance(from_micros(1_100_000_000_000_000)).await;
        tracker.advance(from_micros(1_050_000_000_000_000)).await;
        assert_eq!(
            tracker.sync_watermark().await.unwrap(),
            from_micros(1_100_000_000_000_000)
        );
    }

    #[tokio::test]
    async fn emptied_replica_resyncs_from_floor() {
        let replica = Arc::new(MemoryStore::new("replica"));
        let tracker = WatermarkTracker::new(replica.clone());
        tracker.advance(from_micros(1_100_000_000_000_000)).await;

        assert_eq!(tracker.sync_watermark().await.unwrap(), watermark_floor());
        assert_eq!(tracker.synced_mark().await, Some(from_micros(1_100_000_000_000_000)));
    }
}
