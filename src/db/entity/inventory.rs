use sea_orm::entity::prelude::*;
use sea_orm::ActiveValue::NotSet;
use sea_orm::ActiveValue::Set;

use crate::error::StoreError;
use crate::types::from_micros;
use crate::types::to_micros;
use crate::types::InventoryRecord;

// `last_updated` is kept as unix microseconds: MySQL TIMESTAMP would silently drop the sub-second part and with it the
// ordering of writes that land within one second.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "inventory")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub vin:              String,
    pub car_model:        String,
    pub part_name:        String,
    pub quantity:         i64,
    #[sea_orm(column_type = "Decimal(Some((10, 2)))")]
    pub price:            Decimal,
    pub discount_enabled: bool,
    pub last_updated:     i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl ActiveModel {
    /// Every column but the key, for `UPDATE ... SET`.
    pub fn changes_of(record: &InventoryRecord) -> Self {
        Self {
            vin:              NotSet,
            car_model:        Set(record.car_model.clone()),
            part_name:        Set(record.part_name.clone()),
            quantity:         Set(i64::from(record.quantity)),
            price:            Set(record.price),
            discount_enabled: Set(record.discount_enabled),
            last_updated:     Set(to_micros(&record.last_updated)),
        }
    }

    pub fn from_record(record: &InventoryRecord) -> Self {
        Self {
            vin: Set(record.vin.clone()),
            ..Self::changes_of(record)
        }
    }
}

impl TryFrom<Model> for InventoryRecord {
    type Error = StoreError;

    fn try_from(row: Model) -> Result<Self, Self::Error> {
        let quantity = u32::try_from(row.quantity).map_err(|_| StoreError::Corrupt {
            vin:    row.vin.clone(),
            reason: format!("quantity {} is out of range", row.quantity),
        })?;

        Ok(InventoryRecord {
            vin: row.vin,
            car_model: row.car_model,
            part_name: row.part_name,
            quantity,
            price: row.price,
            discount_enabled: row.discount_enabled,
            last_updated: from_micros(row.last_updated),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn negative_quantity_is_corrupt() {
        let row = Model {
            vin:              "vin001".into(),
            car_model:        "Civic".into(),
            part_name:        "Spark Plug".into(),
            quantity:         -1,
            price:            Decimal::from_str("7.50").unwrap(),
            discount_enabled: true,
            last_updated:     1,
        };
        assert!(matches!(InventoryRecord::try_from(row), Err(StoreError::Corrupt { vin, .. }) if vin == "vin001"));
    }

    #[test]
    fn changes_leave_key_unset() {
        let record = InventoryRecord {
            vin:              "vin001".into(),
            car_model:        "Civic".into(),
            part_name:        "Spark Plug".into(),
            quantity:         4,
            price:            Decimal::from_str("7.50").unwrap(),
            discount_enabled: false,
            last_updated:     from_micros(42),
        };
        let changes = ActiveModel::changes_of(&record);
        assert!(matches!(changes.vin, NotSet));
        assert_eq!(changes.last_updated, Set(42));
        assert_eq!(ActiveModel::from_record(&record).vin, Set("vin001".to_string()));
    }
}
