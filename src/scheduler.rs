use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use crate::detector::ChangeDetector;
use crate::error::Error;
use crate::hub::NotificationHub;
use crate::reconciler::Reconciler;
use crate::traits::RecordStore;
use crate::types::ChangeEvent;
use crate::types::CycleState;
use crate::types::Result;
use crate::types::Timestamp;
use crate::watermark::WatermarkTracker;

/// Outcome of one completed sync cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub watermark: Timestamp,
    pub detected:  usize,
    pub inserted:  usize,
    pub updated:   usize,
    pub skipped:   usize,
    pub notified:  usize,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct SyncStats {
    pub cycles_completed: u64,
    pub cycles_failed:    u64,
    pub cycles_timed_out: u64,
    /// Ticks that found the previous cycle still running.
    pub cycles_skipped:   u64,
    pub records_applied:  u64,
    pub last_watermark:   Option<Timestamp>,
    pub last_success_at:  Option<Timestamp>,
    pub last_cycle_ms:    Option<u64>,
    pub last_error:       Option<String>,
}

// Holding one of these is what "Running" means. Dropping it, including on panic or cancellation, returns to Idle.
struct CycleGuard {
    running: Arc<AtomicBool>,
}

impl CycleGuard {
    fn acquire(running: &Arc<AtomicBool>) -> Option<Self> {
        running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self {
                running: running.clone(),
            })
    }
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Drives periodic sync cycles. At most one cycle runs at any time.
#[derive(Debug)]
pub struct SyncScheduler {
    tracker:    Arc<WatermarkTracker>,
    detector:   ChangeDetector,
    reconciler: Reconciler,
    hub:        Arc<NotificationHub>,
    period:     Duration,
    max_cycle:  Duration,
    overlap:    Duration,
    running:    Arc<AtomicBool>,
    stats:      RwLock<SyncStats>,
    in_flight:  Mutex<Option<JoinHandle<()>>>,
}

impl SyncScheduler {
    pub fn new(
        primary: Arc<dyn RecordStore>,
        replica: Arc<dyn RecordStore>,
        hub: Arc<NotificationHub>,
        period: Duration,
        max_cycle: Duration,
        overlap: Duration,
    ) -> Self {
        Self {
            tracker: Arc::new(WatermarkTracker::new(replica.clone())),
            detector: ChangeDetector::new(primary),
            reconciler: Reconciler::new(replica),
            hub,
            period,
            max_cycle,
            overlap,
            running: Arc::new(AtomicBool::new(false)),
            stats: RwLock::new(SyncStats::default()),
            in_flight: Mutex::new(None),
        }
    }

    pub fn state(&self) -> CycleState {
        if self.running.load(Ordering::Acquire) {
            CycleState::Running
        }
        else {
            CycleState::Idle
        }
    }

    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Shared with writers that touch the replica outside the cycle.
    pub fn tracker(&self) -> &Arc<WatermarkTracker> {
        &self.tracker
    }

    /// Ticks every `period` until `cancel` fires. The first tick is immediate.
    ///
    /// Each cycle runs in its own task so a slow one never delays the ticker; ticks that land on a running cycle are
    /// skipped. On cancellation the cycle in flight, if any, is awaited.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(period = ?self.period, max_cycle = ?self.max_cycle, "Sync scheduler started");

        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.on_tick(),
            }
        }

        let in_flight = self.in_flight.lock().take();
        if let Some(handle) = in_flight {
            if let Err(err) = handle.await {
                error!("Sync cycle task failed: {err}");
            }
        }

        info!("Sync scheduler stopped");
    }

    fn on_tick(self: &Arc<Self>) {
        let Some(guard) = CycleGuard::acquire(&self.running)
        else {
            self.stats.write().cycles_skipped += 1;
            debug!("Previous sync cycle is still running, tick skipped");
            return;
        };

        let myself = self.clone();
        let handle = tokio::spawn(async move {
            // Already logged and counted.
            let _ = myself.guarded_cycle(guard).await;
        });
        *self.in_flight.lock() = Some(handle);
    }

    /// Runs one cycle right away, in the caller's task. `None` means another cycle was already running.
    pub async fn run_once(&self) -> Result<Option<CycleReport>> {
        let Some(guard) = CycleGuard::acquire(&self.running)
        else {
            self.stats.write().cycles_skipped += 1;
            return Ok(None);
        };
        self.guarded_cycle(guard).await.map(Some)
    }

    async fn guarded_cycle(&self, _guard: CycleGuard) -> Result<CycleReport> {
        let started = Instant::now();

        let outcome = match tokio::time::timeout(self.max_cycle, self.cycle()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::CycleTimeout(self.max_cycle)),
        };

        let elapsed = started.elapsed();
        {
            let mut stats = self.stats.write();
            stats.last_cycle_ms = Some(elapsed.as_millis() as u64);
            match &outcome {
                Ok(report) => {
                    stats.cycles_completed += 1;
                    stats.records_applied += (report.inserted + report.updated) as u64;
                    stats.last_watermark = Some(report.watermark);
                    stats.last_success_at = Some(Utc::now());
                    stats.last_error = None;
                }
                Err(err) => {
                    if matches!(err, Error::CycleTimeout(_)) {
                        stats.cycles_timed_out += 1;
                    }
                    else {
                        stats.cycles_failed += 1;
                    }
                    stats.last_error = Some(err.to_string());
                }
            }
        }

        match &outcome {
            Err(err @ Error::CycleTimeout(_)) => warn!("{err}"),
            Err(err) => error!("Error during sync: {err}"),
            Ok(_) => (),
        }

        outcome
    }

    #[instrument(level = "debug", skip(self))]
    async fn cycle(&self) -> Result<CycleReport> {
        let watermark = self.tracker.sync_watermark().await.map_err(Error::cycle)?;
        let since = chrono::Duration::from_std(self.overlap)
            .ok()
            .and_then(|overlap| watermark.checked_sub_signed(overlap))
            .unwrap_or(watermark);

        let changes = self.detector.detect_changes(since).await.map_err(Error::cycle)?;
        let detected = changes.len();
        let newest = changes.iter().map(|record| record.last_updated).max();

        let mut report = CycleReport {
            watermark,
            detected,
            inserted: 0,
            updated: 0,
            skipped: 0,
            notified: 0,
        };

        if detected == 0 {
            debug!(%watermark, "No new inventory changes");
            return Ok(report);
        }

        info!(detected, %watermark, "Found new/updated records, syncing");

        let reconciled = self.reconciler.reconcile(changes).await.map_err(Error::cycle)?;
        if let Some(newest) = newest {
            self.tracker.advance(newest).await;
        }
        for record in &reconciled.applied {
            self.hub.broadcast(&ChangeEvent::record(record));
        }

        report.inserted = reconciled.inserted;
        report.updated = reconciled.updated;
        report.skipped = reconciled.skipped;
        report.notified = reconciled.applied.len();

        info!(
            inserted = report.inserted,
            updated = report.updated,
            skipped = report.skipped,
            "Sync cycle complete"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use sea_orm::prelude::Decimal;

    use super::*;
    use crate::hub::RecordingSubscriber;
    use crate::memory::MemoryStore;
    use crate::types::from_micros;
    use crate::types::EventKind;
    use crate::types::InventoryRecord;

    const T0: i64 = 1_700_000_000_000_000;

    fn rec(vin: &str, quantity: u32, offset: i64) -> InventoryRecord {
        InventoryRecord {
            vin: vin.into(),
            car_model: "Outback".into(),
            part_name: "Timing Belt".into(),
            quantity,
            price: Decimal::from_str("150.00").unwrap(),
            discount_enabled: false,
            last_updated: from_micros(T0 + offset),
        }
    }

    struct Rig {
        primary:    Arc<MemoryStore>,
        replica:    Arc<MemoryStore>,
        subscriber: Arc<RecordingSubscriber>,
        scheduler:  Arc<SyncScheduler>,
    }

    fn rig(overlap: Duration) -> Rig {
        let primary = Arc::new(MemoryStore::new("primary"));
        let replica = Arc::new(MemoryStore::new("replica"));
        let hub = Arc::new(NotificationHub::new());
        let subscriber = RecordingSubscriber::new();
        hub.join(subscriber.clone());
        let scheduler = Arc::new(SyncScheduler::new(
            primary.clone(),
            replica.clone(),
            hub,
            Duration::from_secs(5),
            Duration::from_secs(30),
            overlap,
        ));
        Rig {
            primary,
            replica,
            subscriber,
            scheduler,
        }
    }

    #[tokio::test]
    async fn cycle_copies_and_notifies() {
        let rig = rig(Duration::ZERO);
        rig.primary.put(&rec("vin1", 1, 1_000)).await.unwrap();
        rig.primary.put(&rec("vin2", 2, 2_000)).await.unwrap();

        let report = rig.scheduler.run_once().await.unwrap().unwrap();
        assert_eq!((report.detected, report.inserted, report.notified), (2, 2, 2));
        assert_eq!(rig.replica.snapshot(), rig.primary.snapshot());
        assert_eq!(rig.subscriber.vins_of(EventKind::InventoryUpdate), ["vin1", "vin2"]);

        let report = rig.scheduler.run_once().await.unwrap().unwrap();
        assert_eq!(report.detected, 0);
        assert_eq!(report.watermark, from_micros(T0 + 2_000));
        assert_eq!(rig.subscriber.events().len(), 2);
        assert_eq!(rig.scheduler.stats().cycles_completed, 2);
    }

    #[tokio::test]
    async fn overlap_redetects_without_renotifying() {
        let rig = rig(Duration::from_secs(1));
        rig.primary.put(&rec("vin1", 1, 5_000_000)).await.unwrap();
        rig.scheduler.run_once().await.unwrap();

        let report = rig.scheduler.run_once().await.unwrap().unwrap();
        assert_eq!((report.detected, report.skipped, report.notified), (1, 1, 0));
        assert_eq!(rig.subscriber.events().len(), 1);
    }

    #[tokio::test]
    async fn late_commit_below_watermark_is_picked_up() {
        let rig = rig(Duration::from_secs(10));
        rig.primary.put(&rec("vin2", 2, 2_000_000)).await.unwrap();
        rig.scheduler.run_once().await.unwrap();
        assert_eq!(rig.replica.len(), 1);

        // Stamped before vin2 but committed after the cycle that copied vin2.
        rig.primary.put(&rec("vin1", 1, 1_000_000)).await.unwrap();

        let report = rig.scheduler.run_once().await.unwrap().unwrap();
        assert_eq!(report.watermark, from_micros(T0 + 2_000_000));
        assert_eq!((report.inserted, report.skipped), (1, 1));
        assert_eq!(rig.replica.snapshot(), rig.primary.snapshot());
        assert_eq!(rig.subscriber.vins_of(EventKind::InventoryUpdate), ["vin2", "vin1"]);
    }

    #[tokio::test]
    async fn cycle_advances_synced_mark() {
        let rig = rig(Duration::ZERO);
        assert_eq!(rig.scheduler.tracker().synced_mark().await, None);

        rig.primary.put(&rec("vin1", 1, 1_000)).await.unwrap();
        rig.scheduler.run_once().await.unwrap();
        assert_eq!(rig.scheduler.tracker().synced_mark().await, Some(from_micros(T0 + 1_000)));

        // A write that skips the cycle moves the replica maximum but not the point detection starts from.
        rig.replica.put(&rec("vin9", 9, 9_000)).await.unwrap();
        rig.primary.put(&rec("vin2", 2, 2_000)).await.unwrap();
        let report = rig.scheduler.run_once().await.unwrap().unwrap();
        assert_eq!(report.watermark, from_micros(T0 + 1_000));
        assert_eq!(report.inserted, 1);
        assert_eq!(rig.scheduler.tracker().synced_mark().await, Some(from_micros(T0 + 2_000)));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_cycle_is_refused() {
        let rig = rig(Duration::ZERO);
        rig.primary.put(&rec("vin1", 1, 1_000)).await.unwrap();
        rig.primary.set_latency(Some(Duration::from_secs(1)));

        let (first, second) = tokio::join!(rig.scheduler.run_once(), rig.scheduler.run_once());
        assert!(first.unwrap().is_some());
        assert!(second.unwrap().is_none());
        assert_eq!(rig.scheduler.stats().cycles_skipped, 1);
        assert_eq!(rig.scheduler.state(), CycleState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_cycle_times_out() {
        let rig = rig(Duration::ZERO);
        rig.primary.put(&rec("vin1", 1, 1_000)).await.unwrap();
        rig.primary.set_latency(Some(Duration::from_secs(120)));

        let err = rig.scheduler.run_once().await.unwrap_err();
        assert!(matches!(err, Error::CycleTimeout(d) if d == Duration::from_secs(30)));
        assert_eq!(rig.scheduler.state(), CycleState::Idle);
        assert_eq!(rig.scheduler.stats().cycles_timed_out, 1);

        rig.primary.set_latency(None);
        assert!(rig.scheduler.run_once().await.unwrap().is_some());
        assert_eq!(rig.replica.len(), 1);
    }

    #[tokio::test]
    async fn failure_returns_to_idle_and_recovers() {
        let rig = rig(Duration::ZERO);
        rig.primary.put(&rec("vin1", 1, 1_000)).await.unwrap();
        rig.replica.set_unavailable(true);

        let err = rig.scheduler.run_once().await.unwrap_err();
        assert!(matches!(err, Error::CycleFailure(_)));
        assert_eq!(rig.scheduler.state(), CycleState::Idle);
        let stats = rig.scheduler.stats();
        assert_eq!(stats.cycles_failed, 1);
        assert!(stats.last_error.unwrap().contains("replica"));

        rig.replica.set_unavailable(false);
        rig.scheduler.run_once().await.unwrap();
        assert_eq!(rig.replica.snapshot(), rig.primary.snapshot());
        assert!(rig.scheduler.stats().last_error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_runs_until_cancelled() {
        let rig = rig(Duration::ZERO);
        rig.primary.put(&rec("vin1", 1, 1_000)).await.unwrap();

        let cancel = CancellationToken::new();
        let task = tokio::spawn(rig.scheduler.clone().run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(11_000)).await;
        rig.primary.put(&rec("vin2", 1, 2_000)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5_000)).await;

        cancel.cancel();
        task.await.unwrap();

        assert!(rig.scheduler.stats().cycles_completed >= 3);
        assert_eq!(rig.replica.len(), 2);
        assert_eq!(rig.subscriber.vins_of(EventKind::InventoryUpdate), ["vin1", "vin2"]);
    }
}
