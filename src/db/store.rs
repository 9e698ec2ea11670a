use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::sea_query::Expr;
use sea_orm::sea_query::OnConflict;
use sea_orm::ColumnTrait;
use sea_orm::DatabaseConnection;
use sea_orm::DbErr;
use sea_orm::EntityTrait;
use sea_orm::QueryFilter;
use sea_orm::QueryOrder;
use sea_orm::QuerySelect;
use sea_orm::SqlErr;
use sea_orm_migration::MigratorTrait;
use tracing::debug;
use tracing::instrument;

use crate::error::StoreError;
use crate::traits::RecordStore;
use crate::types::from_micros;
use crate::types::successor;
use crate::types::to_micros;
use crate::types::FieldPatch;
use crate::types::InventoryRecord;
use crate::types::Timestamp;
use crate::types::UpsertOutcome;

use super::driver;
use super::driver::DatabaseDriver;
use super::entity::inventory::ActiveModel;
use super::entity::inventory::Column;
use super::entity::Inventory;
use super::migrations::Migrator;

/// How many times a field patch re-reads the row after losing a race to another writer.
const PATCH_ATTEMPTS: u32 = 8;

/// [`RecordStore`] over one `inventory` table reached through a [`DatabaseDriver`].
pub struct SeaStore {
    name:   String,
    driver: Arc<dyn DatabaseDriver>,
}

impl SeaStore {
    pub fn new<S: Into<String>>(name: S, driver: Arc<dyn DatabaseDriver>) -> Self {
        Self {
            name: name.into(),
            driver,
        }
    }

    pub async fn connect<S: Into<String>>(name: S, url: &str, max_connections: u32) -> Result<Self, StoreError> {
        Ok(Self::new(name, driver::connect(url, max_connections).await?))
    }

    pub fn driver(&self) -> &Arc<dyn DatabaseDriver> {
        &self.driver
    }

    /// Creates the inventory table and its index unless they're already there.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        Migrator::up(&self.connection(), None).await?;
        debug!(store = %self.name, "Schema is up to date");
        Ok(())
    }

    #[inline]
    fn connection(&self) -> DatabaseConnection {
        self.driver.connection()
    }

    async fn update_if_older(&self, db: &DatabaseConnection, record: &InventoryRecord) -> Result<bool, DbErr> {
        let result = Inventory::update_many()
            .set(ActiveModel::changes_of(record))
            .filter(Column::Vin.eq(record.vin.as_str()))
            .filter(Column::LastUpdated.lt(to_micros(&record.last_updated)))
            .exec(db)
            .await?;
        Ok(result.rows_affected > 0)
    }
}

impl std::fmt::Debug for SeaStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeaStore")
            .field("name", &self.name)
            .field("backend", &self.driver.name())
            .finish()
    }
}

#[async_trait]
impl RecordStore for SeaStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, vin: &str) -> Result<Option<InventoryRecord>, StoreError> {
        Inventory::find_by_id(vin.to_owned())
            .one(&self.connection())
            .await?
            .map(InventoryRecord::try_from)
            .transpose()
    }

    async fn max_last_updated(&self) -> Result<Option<Timestamp>, StoreError> {
        let max = Inventory::find()
            .select_only()
            .column_as(Expr::col(Column::LastUpdated).max(), "max_last_updated")
            .into_tuple::<Option<i64>>()
            .one(&self.connection())
            .await?;
        Ok(max.flatten().map(from_micros))
    }

    #[instrument(level = "trace", skip(self), fields(store = %self.name))]
    async fn changed_since(&self, watermark: Timestamp) -> Result<Vec<InventoryRecord>, StoreError> {
        Inventory::find()
            .filter(Column::LastUpdated.gt(to_micros(&watermark)))
            .order_by_asc(Column::LastUpdated)
            .order_by_asc(Column::Vin)
            .all(&self.connection())
            .await?
            .into_iter()
            .map(InventoryRecord::try_from)
            .collect()
    }

    #[instrument(level = "trace", skip(self, record), fields(store = %self.name, vin = %record.vin))]
    async fn upsert_if_newer(&self, record: &InventoryRecord) -> Result<UpsertOutcome, StoreError> {
        let db = self.connection();

        if self.update_if_older(&db, record).await? {
            return Ok(UpsertOutcome::Updated);
        }

        // Either there is no row yet or the stored one is not older. The insert tells which.
        match Inventory::insert(ActiveModel::from_record(record))
            .exec_without_returning(&db)
            .await
        {
            Ok(_) => return Ok(UpsertOutcome::Inserted),
            Err(err) if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => (),
            Err(err) => return Err(err.into()),
        }

        // Someone may have inserted an older copy between our update and insert.
        if self.update_if_older(&db, record).await? {
            Ok(UpsertOutcome::Updated)
        }
        else {
            Ok(UpsertOutcome::Skipped)
        }
    }

    #[instrument(level = "trace", skip(self), fields(store = %self.name))]
    async fn apply_patch(
        &self,
        vin: &str,
        patch: FieldPatch,
        stamp: Timestamp,
    ) -> Result<Option<InventoryRecord>, StoreError> {
        let db = self.connection();

        for attempt in 1..=PATCH_ATTEMPTS {
            let Some(row) = Inventory::find_by_id(vin.to_owned()).one(&db).await?
            else {
                return Ok(None);
            };
            let previous = row.last_updated;
            let mut record = InventoryRecord::try_from(row)?;

            patch.apply_to(&mut record);
            record.last_updated = stamp.max(successor(&record.last_updated));

            let result = Inventory::update_many()
                .set(ActiveModel::changes_of(&record))
                .filter(Column::Vin.eq(vin))
                .filter(Column::LastUpdated.eq(previous))
                .exec(&db)
                .await?;

            if result.rows_affected > 0 {
                return Ok(Some(record));
            }

            debug!(vin, attempt, "Row changed while patching, retrying");
        }

        Err(StoreError::Contention {
            vin:      vin.to_string(),
            attempts: PATCH_ATTEMPTS,
        })
    }

    async fn put(&self, record: &InventoryRecord) -> Result<(), StoreError> {
        Inventory::insert(ActiveModel::from_record(record))
            .on_conflict(
                OnConflict::column(Column::Vin)
                    .update_columns([
                        Column::CarModel,
                        Column::PartName,
                        Column::Quantity,
                        Column::Price,
                        Column::DiscountEnabled,
                        Column::LastUpdated,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&self.connection())
            .await?;
        Ok(())
    }
}
