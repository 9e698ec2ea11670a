//! # inventory-sync
//!
//! Keeps a replica inventory store eventually consistent with a primary one and tells live subscribers about every
//! change as it lands.
//!
//! # The Basics
//!
//! Two inventories hold the same kind of records, keyed by VIN. The primary is the source of truth and may be written
//! by anyone. The replica is only written by this crate. Each record carries a `last_updated` timestamp, and that
//! timestamp is the whole replication protocol:
//!
//! - The replica's greatest `last_updated` is its _watermark_.
//! - Every primary record newer than the watermark is a change to copy.
//! - A copy is written only when it's newer than what the replica already holds.
//!
//! The last rule makes every write commutative, so the periodic sync cycle and any number of webhook requests may
//! run against both stores at once without a global lock. Whatever order they land in, the newest version wins.
//!
//! # Components
//!
//! | Component | Type |
//! | --------- | ---- |
//! | Watermark tracker | [`WatermarkTracker`](watermark::WatermarkTracker) |
//! | Change detector | [`ChangeDetector`](detector::ChangeDetector) |
//! | Reconciler | [`Reconciler`](reconciler::Reconciler) |
//! | Sync cycle scheduler | [`SyncScheduler`](scheduler::SyncScheduler) |
//! | Webhook update handler | [`WebhookHandler`](webhook::WebhookHandler) |
//! | Notification hub | [`NotificationHub`](hub::NotificationHub) |
//!
//! [`SyncEngine`] wires them around two [`RecordStore`]s. Stores are either [`SeaStore`](db::SeaStore) over MySQL,
//! PostgreSQL or SQLite, or the in-memory [`MemoryStore`](memory::MemoryStore).
//!
//! The cycle is `Idle → Running → Idle` on a fixed period. A tick landing on a running cycle is skipped, a failing
//! cycle is logged and waits for the next tick, and a cycle exceeding its time limit is abandoned.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use inventory_sync::prelude::*;
//!
//! # async fn demo() -> Result<()> {
//! let primary = Arc::new(MemoryStore::new("primary"));
//! let replica = Arc::new(MemoryStore::new("replica"));
//! let engine = SyncEngine::new(EngineSettings::default().with_secret("s3cr3t"), primary, replica);
//!
//! let (_id, mut events) = engine.hub().channel(16);
//! engine.sync_once().await?;
//! while let Ok(event) = events.try_recv() {
//!     println!("{}: {}", event.event, event.data);
//! }
//! # Ok(())
//! # }
//! ```

pub mod app;
pub mod clock;
pub mod config;
pub mod db;
pub mod detector;
pub mod engine;
pub mod error;
pub mod hub;
pub mod memory;
pub mod reconciler;
pub mod scheduler;
pub mod server;
pub mod traits;
pub mod types;
pub mod watermark;
pub mod webhook;

#[doc(inline)]
pub use engine::EngineSettings;
#[doc(inline)]
pub use engine::SyncEngine;
#[doc(inline)]
pub use error::Error;
#[doc(inline)]
pub use traits::RecordStore;

pub mod prelude {
    pub use crate::engine::EngineSettings;
    pub use crate::engine::SyncEngine;
    pub use crate::error::Error;
    pub use crate::error::StoreError;
    pub use crate::hub::NotificationHub;
    pub use crate::memory::MemoryStore;
    pub use crate::traits::RecordStore;
    pub use crate::traits::Subscriber;
    pub use crate::types::ChangeEvent;
    pub use crate::types::EventKind;
    pub use crate::types::FieldPatch;
    pub use crate::types::InventoryRecord;
    pub use crate::types::Result;
    pub use crate::types::UpsertOutcome;
}
