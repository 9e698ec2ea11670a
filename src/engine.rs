use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::hub::NotificationHub;
use crate::scheduler::CycleReport;
use crate::scheduler::SyncScheduler;
use crate::scheduler::SyncStats;
use crate::traits::RecordStore;
use crate::types::CycleState;
use crate::types::Result;
use crate::webhook::WebhookHandler;

/// Tunables of a [`SyncEngine`].
#[derive(Clone)]
pub struct EngineSettings {
    pub sync_period:        Duration,
    pub max_cycle_duration: Duration,
    pub watermark_overlap:  Duration,
    pub webhook_secret:     String,
    pub mirror_to_replica:  bool,
    pub subscriber_buffer:  usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            sync_period:        Duration::from_secs(5),
            max_cycle_duration: Duration::from_secs(30),
            // Covers a write stamped before it waited out the store's 10s acquire timeout.
            watermark_overlap:  Duration::from_secs(10),
            webhook_secret:     String::new(),
            mirror_to_replica:  false,
            subscriber_buffer:  64,
        }
    }
}

impl EngineSettings {
    pub fn with_secret<S: Into<String>>(mut self, secret: S) -> Self {
        self.webhook_secret = secret.into();
        self
    }

    pub fn with_sync_period(mut self, period: Duration) -> Self {
        self.sync_period = period;
        self
    }

    pub fn with_max_cycle_duration(mut self, max: Duration) -> Self {
        self.max_cycle_duration = max;
        self
    }

    pub fn with_watermark_overlap(mut self, overlap: Duration) -> Self {
        self.watermark_overlap = overlap;
        self
    }

    pub fn with_mirroring(mut self, mirror_to_replica: bool) -> Self {
        self.mirror_to_replica = mirror_to_replica;
        self
    }

    pub fn with_subscriber_buffer(mut self, capacity: usize) -> Self {
        self.subscriber_buffer = capacity;
        self
    }
}

impl std::fmt::Debug for EngineSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineSettings")
            .field("sync_period", &self.sync_period)
            .field("max_cycle_duration", &self.max_cycle_duration)
            .field("watermark_overlap", &self.watermark_overlap)
            .field("webhook_secret", &"<redacted>")
            .field("mirror_to_replica", &self.mirror_to_replica)
            .field("subscriber_buffer", &self.subscriber_buffer)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub status:      &'static str,
    pub cycle_state: CycleState,
    pub subscribers: usize,
    pub stats:       SyncStats,
}

/// One primary, one replica, and everything that keeps them in step.
///
/// The scheduler and the webhook handler share the hub, the two stores and the watermark tracker. Any number of webhook
/// calls may run next to a cycle.
#[derive(Debug)]
pub struct SyncEngine {
    primary:           Arc<dyn RecordStore>,
    replica:           Arc<dyn RecordStore>,
    hub:               Arc<NotificationHub>,
    scheduler:         Arc<SyncScheduler>,
    webhook:           WebhookHandler,
    subscriber_buffer: usize,
}

impl SyncEngine {
    pub fn new(settings: EngineSettings, primary: Arc<dyn RecordStore>, replica: Arc<dyn RecordStore>) -> Self {
        let hub = Arc::new(NotificationHub::new());

        let scheduler = Arc::new(SyncScheduler::new(
            primary.clone(),
            replica.clone(),
            hub.clone(),
            settings.sync_period,
            settings.max_cycle_duration,
            settings.watermark_overlap,
        ));

        let webhook = WebhookHandler::new(settings.webhook_secret, primary.clone(), replica.clone(), hub.clone())
            .with_mirroring(settings.mirror_to_replica)
            .with_tracker(scheduler.tracker().clone());

        Self {
            primary,
            replica,
            hub,
            scheduler,
            webhook,
            subscriber_buffer: settings.subscriber_buffer,
        }
    }

    pub fn primary(&self) -> &Arc<dyn RecordStore> {
        &self.primary
    }

    pub fn replica(&self) -> &Arc<dyn RecordStore> {
        &self.replica
    }

    pub fn hub(&self) -> &Arc<NotificationHub> {
        &self.hub
    }

    pub fn scheduler(&self) -> &Arc<SyncScheduler> {
        &self.scheduler
    }

    pub fn webhook(&self) -> &WebhookHandler {
        &self.webhook
    }

    pub fn subscriber_buffer(&self) -> usize {
        self.subscriber_buffer
    }

    /// Starts periodic syncing in the background until `cancel` fires.
    pub fn spawn_scheduler(&self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.scheduler.clone().run(cancel))
    }

    /// Runs a single sync cycle now.
    pub async fn sync_once(&self) -> Result<Option<CycleReport>> {
        self.scheduler.run_once().await
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            status:      "ok",
            cycle_state: self.scheduler.state(),
            subscribers: self.hub.len(),
            stats:       self.scheduler.stats(),
        }
    }
}
