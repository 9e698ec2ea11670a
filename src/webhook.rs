use std::sync::Arc;

use serde_json::Map;
use serde_json::Value;
use subtle::ConstantTimeEq;
use tracing::error;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use crate::clock::MonotonicClock;
use crate::error::Error;
use crate::hub::NotificationHub;
use crate::traits::RecordStore;
use crate::types::ChangeEvent;
use crate::types::EventKind;
use crate::types::FieldPatch;
use crate::types::InventoryRecord;
use crate::types::Result;
use crate::types::UpsertOutcome;
use crate::watermark::WatermarkTracker;

/// Header carrying the shared secret.
pub const SECRET_HEADER: &str = "x-webhook-secret";

#[derive(Debug, Clone, PartialEq)]
pub struct WebhookOutcome {
    /// The primary record after the update.
    pub record:   InventoryRecord,
    pub patch:    FieldPatch,
    /// What the replica did with the mirrored copy, `None` when mirroring is off.
    pub mirrored: Option<UpsertOutcome>,
    /// Subscribers reached by the `inventory_update` event.
    pub notified: usize,
}

impl WebhookOutcome {
    pub fn message(&self) -> &'static str {
        match self.patch {
            FieldPatch::Stock { .. } => "Stock updated successfully",
            FieldPatch::Offer { .. } => "Offer updated successfully",
        }
    }
}

/// Applies single-field changes pushed by external systems, ahead of the sync cycle.
pub struct WebhookHandler {
    secret:            String,
    mirror_to_replica: bool,
    primary:           Arc<dyn RecordStore>,
    replica:           Arc<dyn RecordStore>,
    hub:               Arc<NotificationHub>,
    tracker:           Arc<WatermarkTracker>,
    clock:             MonotonicClock,
}

impl WebhookHandler {
    pub fn new<S: Into<String>>(
        secret: S,
        primary: Arc<dyn RecordStore>,
        replica: Arc<dyn RecordStore>,
        hub: Arc<NotificationHub>,
    ) -> Self {
        Self {
            secret: secret.into(),
            mirror_to_replica: false,
            primary,
            tracker: Arc::new(WatermarkTracker::new(replica.clone())),
            replica,
            hub,
            clock: MonotonicClock::new(),
        }
    }

    pub fn with_mirroring(mut self, mirror_to_replica: bool) -> Self {
        self.mirror_to_replica = mirror_to_replica;
        self
    }

    /// Mirrored writes pin this tracker's synced mark. Pass the scheduler's tracker.
    pub fn with_tracker(mut self, tracker: Arc<WatermarkTracker>) -> Self {
        self.tracker = tracker;
        self
    }

    /// `POST /webhook/update-stock`: `{"vin": .., "quantity": ..}`.
    pub async fn update_stock(&self, credential: Option<&str>, body: &[u8]) -> Result<WebhookOutcome> {
        self.authorize(credential)?;
        let (vin, patch) = parse_stock(body)?;
        self.apply(&vin, patch).await
    }

    /// `POST /webhook/update-offer`: `{"vin": .., "discount_enabled": ..}`.
    pub async fn update_offer(&self, credential: Option<&str>, body: &[u8]) -> Result<WebhookOutcome> {
        self.authorize(credential)?;
        let (vin, patch) = parse_offer(body)?;
        self.apply(&vin, patch).await
    }

    fn authorize(&self, credential: Option<&str>) -> Result<()> {
        let supplied = credential.unwrap_or_default().as_bytes();
        if !self.secret.is_empty() && bool::from(supplied.ct_eq(self.secret.as_bytes())) {
            Ok(())
        }
        else {
            warn!(present = credential.is_some(), "Rejected webhook request with a bad secret");
            Err(Error::Unauthorized)
        }
    }

    #[instrument(level = "debug", skip(self), fields(field = patch.field_name()))]
    async fn apply(&self, vin: &str, patch: FieldPatch) -> Result<WebhookOutcome> {
        let record = match self.primary.apply_patch(vin, patch, self.clock.now()).await {
            Ok(Some(record)) => record,
            Ok(None) => return Err(Error::NotFound(vin.to_string())),
            Err(err) => {
                error!(vin, store = self.primary.name(), "Webhook update failed: {err}");
                return Err(err.into());
            }
        };

        let mirrored = if self.mirror_to_replica {
            let mirror = async {
                self.tracker.pin().await?;
                self.replica.upsert_if_newer(&record).await
            };
            match mirror.await {
                Ok(outcome) => Some(outcome),
                Err(err) => {
                    // The next sync cycle brings the replica up to date.
                    error!(vin, store = self.replica.name(), "Primary updated, mirror write failed: {err}");
                    return Err(err.into());
                }
            }
        }
        else {
            None
        };

        let report = self.hub.broadcast(&ChangeEvent::patched(
            EventKind::InventoryUpdate,
            vin,
            &patch,
            Some(&record.last_updated),
        ));
        self.hub
            .broadcast(&ChangeEvent::patched(patch.narrow_event(), vin, &patch, None));

        info!(vin, field = patch.field_name(), value = %patch.field_value(), "Webhook update applied");

        Ok(WebhookOutcome {
            record,
            patch,
            mirrored,
            notified: report.delivered,
        })
    }
}

impl std::fmt::Debug for WebhookHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookHandler")
            .field("secret", &"<redacted>")
            .field("mirror_to_replica", &self.mirror_to_replica)
            .field("primary", &self.primary.name())
            .field("replica", &self.replica.name())
            .finish_non_exhaustive()
    }
}

fn parse_object(body: &[u8]) -> Result<Map<String, Value>> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(Error::invalid("request body must be a JSON object")),
        Err(err) => Err(Error::invalid(format!("malformed JSON body: {err}"))),
    }
}

fn present<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    map.get(key).filter(|v| !v.is_null())
}

fn required_vin(map: &Map<String, Value>, field: &str) -> Result<String> {
    let missing = || Error::invalid(format!("VIN and {field} are required"));
    match present(map, "vin") {
        Some(Value::String(vin)) if !vin.trim().is_empty() => Ok(vin.clone()),
        Some(Value::String(_)) | None => Err(missing()),
        Some(_) => Err(Error::invalid("vin must be a string")),
    }
}

/// Validates a stock update body.
pub fn parse_stock(body: &[u8]) -> Result<(String, FieldPatch)> {
    let map = parse_object(body)?;
    let vin = required_vin(&map, "quantity")?;
    let value = present(&map, "quantity").ok_or_else(|| Error::invalid("VIN and quantity are required"))?;
    let quantity = value
        .as_u64()
        .and_then(|q| u32::try_from(q).ok())
        .ok_or_else(|| Error::invalid("quantity must be a non-negative integer"))?;

    Ok((vin, FieldPatch::Stock { quantity }))
}

/// Validates an offer update body. `0` and `1` are accepted as booleans, as MySQL clients tend to send them.
pub fn parse_offer(body: &[u8]) -> Result<(String, FieldPatch)> {
    let map = parse_object(body)?;
    let vin = required_vin(&map, "discount_enabled")?;
    let value =
        present(&map, "discount_enabled").ok_or_else(|| Error::invalid("VIN and discount_enabled are required"))?;
    let discount_enabled = match value {
        Value::Bool(flag) => *flag,
        Value::Number(n) if n.as_u64() == Some(0) => false,
        Value::Number(n) if n.as_u64() == Some(1) => true,
        _ => return Err(Error::invalid("discount_enabled must be a boolean")),
    };

    Ok((vin, FieldPatch::Offer { discount_enabled }))
}
