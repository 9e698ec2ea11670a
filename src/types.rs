use std::fmt::Display;

use chrono::DateTime;
use chrono::Utc;
use sea_orm::prelude::Decimal;
use serde::Deserialize;
use serde::Serialize;
use serde_json::json;
use serde_json::Value;

use crate::error::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Change-detection key of a record. Always carries microsecond precision.
pub type Timestamp = DateTime<Utc>;

// 2000-01-01T00:00:00Z
const WATERMARK_FLOOR_MICROS: i64 = 946_684_800_000_000;

/// Watermark of an empty replica. Anything the primary holds is newer than this.
pub fn watermark_floor() -> Timestamp {
    from_micros(WATERMARK_FLOOR_MICROS)
}

#[inline]
pub fn to_micros(ts: &Timestamp) -> i64 {
    ts.timestamp_micros()
}

pub fn from_micros(micros: i64) -> Timestamp {
    DateTime::from_timestamp(micros.div_euclid(1_000_000), (micros.rem_euclid(1_000_000) * 1_000) as u32)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// The smallest timestamp strictly greater than `ts`.
#[inline]
pub fn successor(ts: &Timestamp) -> Timestamp {
    from_micros(to_micros(ts).saturating_add(1))
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub vin:              String,
    pub car_model:        String,
    pub part_name:        String,
    pub quantity:         u32,
    #[serde(with = "decimal_str")]
    pub price:            Decimal,
    pub discount_enabled: bool,
    pub last_updated:     Timestamp,
}

impl InventoryRecord {
    pub fn is_newer_than(&self, other: &InventoryRecord) -> bool {
        self.last_updated > other.last_updated
    }
}

// MySQL hands DECIMAL columns out as strings; keep the same shape on the wire.
mod decimal_str {
    use std::str::FromStr;

    use sea_orm::prelude::Decimal;
    use serde::de;
    use serde::Deserialize;
    use serde::Deserializer;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Decimal, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Decimal, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Text(String),
            Number(f64),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Text(text) => Decimal::from_str(&text).map_err(de::Error::custom),
            Repr::Number(number) => Decimal::try_from(number).map_err(de::Error::custom),
        }
    }
}

/// A targeted change of one mutable field, as pushed through the webhook.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldPatch {
    Stock { quantity: u32 },
    Offer { discount_enabled: bool },
}

impl FieldPatch {
    pub fn apply_to(&self, record: &mut InventoryRecord) {
        match *self {
            FieldPatch::Stock { quantity } => record.quantity = quantity,
            FieldPatch::Offer { discount_enabled } => record.discount_enabled = discount_enabled,
        }
    }

    pub fn field_name(&self) -> &'static str {
        match self {
            FieldPatch::Stock { .. } => "quantity",
            FieldPatch::Offer { .. } => "discount_enabled",
        }
    }

    pub fn field_value(&self) -> Value {
        match *self {
            FieldPatch::Stock { quantity } => json!(quantity),
            FieldPatch::Offer { discount_enabled } => json!(discount_enabled),
        }
    }

    /// The field-specific event announced next to `inventory_update`.
    pub fn narrow_event(&self) -> EventKind {
        match self {
            FieldPatch::Stock { .. } => EventKind::StockUpdate,
            FieldPatch::Offer { .. } => EventKind::OfferUpdate,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    InventoryUpdate,
    StockUpdate,
    OfferUpdate,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::InventoryUpdate => "inventory_update",
            EventKind::StockUpdate => "stock_update",
            EventKind::OfferUpdate => "offer_update",
        }
    }
}

impl Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named event pushed to real-time subscribers. `data` always carries `vin`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub event: EventKind,
    pub data:  Value,
}

impl ChangeEvent {
    /// Full-record `inventory_update`, as emitted by the sync cycle.
    pub fn record(record: &InventoryRecord) -> Self {
        Self {
            event: EventKind::InventoryUpdate,
            data:  serde_json::to_value(record).unwrap_or_else(|_| json!({ "vin": record.vin })),
        }
    }

    /// Partial event carrying only the changed field.
    pub fn patched(event: EventKind, vin: &str, patch: &FieldPatch, last_updated: Option<&Timestamp>) -> Self {
        let mut data = json!({ "vin": vin });
        data[patch.field_name()] = patch.field_value();
        if let Some(ts) = last_updated {
            data["last_updated"] = json!(ts);
        }
        Self { event, data }
    }

    pub fn vin(&self) -> Option<&str> {
        self.data.get("vin").and_then(Value::as_str)
    }
}

/// What a conditional write did with the incoming record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// The store already held the same or a newer `last_updated`.
    Skipped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    Idle,
    Running,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn record() -> InventoryRecord {
        InventoryRecord {
            vin:              "vin007".into(),
            car_model:        "Golf".into(),
            part_name:        "Brake Pad".into(),
            quantity:         12,
            price:            Decimal::from_str("129.99").unwrap(),
            discount_enabled: false,
            last_updated:     from_micros(1_700_000_000_123_456),
        }
    }

    #[test]
    fn micros_conversion_is_exact() {
        let ts = from_micros(1_700_000_000_123_456);
        assert_eq!(to_micros(&ts), 1_700_000_000_123_456);
        assert_eq!(to_micros(&successor(&ts)), 1_700_000_000_123_457);
        assert_eq!(watermark_floor().to_rfc3339(), "2000-01-01T00:00:00+00:00");
    }

    #[test]
    fn nanoseconds_are_dropped() {
        let ts = DateTime::from_timestamp(1_700_000_000, 123_456_789).unwrap();
        assert_eq!(from_micros(to_micros(&ts)).timestamp_subsec_nanos(), 123_456_000);
    }

    #[test]
    fn price_is_a_decimal_string_on_the_wire() {
        let value = serde_json::to_value(record()).unwrap();
        assert_eq!(value["price"], json!("129.99"));

        let back: InventoryRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, record());

        let mut numeric = serde_json::to_value(record()).unwrap();
        numeric["price"] = json!(12.5);
        let back: InventoryRecord = serde_json::from_value(numeric).unwrap();
        assert_eq!(back.price, Decimal::from_str("12.5").unwrap());
    }

    #[test]
    fn patch_touches_one_field() {
        let mut rec = record();
        FieldPatch::Stock { quantity: 5 }.apply_to(&mut rec);
        assert_eq!(rec.quantity, 5);
        assert!(!rec.discount_enabled);

        FieldPatch::Offer { discount_enabled: true }.apply_to(&mut rec);
        assert!(rec.discount_enabled);
        assert_eq!(rec.quantity, 5);
    }

    #[test]
    fn events_serialize_with_name_and_vin() {
        let patch = FieldPatch::Stock { quantity: 5 };
        let event = ChangeEvent::patched(EventKind::StockUpdate, "vin007", &patch, None);
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({ "event": "stock_update", "data": { "vin": "vin007", "quantity": 5 } })
        );
        assert_eq!(event.vin(), Some("vin007"));

        let full = ChangeEvent::record(&record());
        assert_eq!(full.event, EventKind::InventoryUpdate);
        assert_eq!(full.data["car_model"], json!("Golf"));
        assert_eq!(full.vin(), Some("vin007"));
    }
}
