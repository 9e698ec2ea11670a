use std::sync::Arc;

use serde::Serialize;
use tracing::debug;
use tracing::instrument;

use crate::error::StoreError;
use crate::traits::RecordStore;
use crate::types::InventoryRecord;
use crate::types::UpsertOutcome;

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub inserted: usize,
    pub updated:  usize,
    pub skipped:  usize,
    /// Records actually written to the replica, in the order they were applied.
    #[serde(skip)]
    pub applied:  Vec<InventoryRecord>,
}

impl ReconcileReport {
    fn count(&mut self, outcome: UpsertOutcome, record: InventoryRecord) {
        match outcome {
            UpsertOutcome::Inserted => self.inserted += 1,
            UpsertOutcome::Updated => self.updated += 1,
            UpsertOutcome::Skipped => {
                self.skipped += 1;
                return;
            }
        }
        self.applied.push(record);
    }
}

/// Writes detected changes into the replica.
#[derive(Debug, Clone)]
pub struct Reconciler {
    replica: Arc<dyn RecordStore>,
}

impl Reconciler {
    pub fn new(replica: Arc<dyn RecordStore>) -> Self {
        Self { replica }
    }

    /// Upserts each record in the given order, never overwriting a newer replica copy.
    ///
    /// Stops at the first store error. Everything applied before it stays applied, and since the input is ordered by
    /// `last_updated` the replica watermark never gets past a record that wasn't written.
    #[instrument(level = "debug", skip_all, fields(count = changes.len()))]
    pub async fn reconcile(&self, changes: Vec<InventoryRecord>) -> Result<ReconcileReport, StoreError> {
        let mut report = ReconcileReport::default();

        for record in changes {
            let outcome = self.replica.upsert_if_newer(&record).await?;
            debug!(vin = %record.vin, ?outcome, "Reconciled");
            report.count(outcome, record);
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use sea_orm::prelude::Decimal;

    use super::*;
    use crate::memory::MemoryStore;
    use crate::types::from_micros;

    fn rec(vin: &str, quantity: u32, ts: i64) -> InventoryRecord {
        InventoryRecord {
            vin: vin.into(),
            car_model: "Focus".into(),
            part_name: "Headlight".into(),
            quantity,
            price: Decimal::from_str("80.25").unwrap(),
            discount_enabled: false,
            last_updated: from_micros(ts),
        }
    }

    #[tokio::test]
    async fn counts_each_outcome() {
        let replica = Arc::new(MemoryStore::with_records("replica", [rec("vin2", 1, 200), rec("vin3", 1, 900)]));
        let reconciler = Reconciler::new(replica.clone());

        let report = reconciler
            .reconcile(vec![rec("vin1", 5, 100), rec("vin2", 6, 300), rec("vin3", 7, 400)])
            .await
            .unwrap();

        assert_eq!((report.inserted, report.updated, report.skipped), (1, 1, 1));
        assert_eq!(
            report.applied.iter().map(|r| r.vin.as_str()).collect::<Vec<_>>(),
            ["vin1", "vin2"]
        );
        // The newer replica copy survived.
        assert_eq!(replica.get("vin3").await.unwrap().unwrap().quantity, 1);
    }

    #[tokio::test]
    async fn replaying_is_harmless() {
        let replica = Arc::new(MemoryStore::new("replica"));
        let reconciler = Reconciler::new(replica.clone());
        let batch = vec![rec("vin1", 1, 100), rec("vin2", 2, 200)];

        reconciler.reconcile(batch.clone()).await.unwrap();
        let before = replica.snapshot();
        let report = reconciler.reconcile(batch).await.unwrap();

        assert_eq!(report.skipped, 2);
        assert!(report.applied.is_empty());
        assert_eq!(replica.snapshot(), before);
    }

    #[tokio::test]
    async fn store_failure_aborts() {
        let replica = Arc::new(MemoryStore::new("replica"));
        replica.set_unavailable(true);
        let err = Reconciler::new(replica)
            .reconcile(vec![rec("vin1", 1, 100)])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}
