#![allow(dead_code)]

use std::str::FromStr;

use inventory_sync::types::from_micros;
use inventory_sync::types::InventoryRecord;
use sea_orm::prelude::Decimal;

/// 2023-11-14T22:13:20Z, comfortably above the watermark floor.
pub const T0: i64 = 1_700_000_000_000_000;

pub const SECRET: &str = "test-secret";

/// A record stamped `offset` microseconds after [`T0`].
pub fn record(vin: &str, quantity: u32, offset: i64) -> InventoryRecord {
    InventoryRecord {
        vin: vin.to_string(),
        car_model: "Camry".to_string(),
        part_name: "Brake Disc".to_string(),
        quantity,
        // Exact in binary so backends storing decimals as floats return the same value.
        price: Decimal::from_str("42.25").unwrap(),
        discount_enabled: false,
        last_updated: from_micros(T0 + offset),
    }
}

/// `vin001..` style dataset, one microsecond apart.
pub fn dataset(count: usize) -> Vec<InventoryRecord> {
    (1..=count)
        .map(|i| record(&format!("vin{i:03}"), i as u32, i as i64))
        .collect()
}
