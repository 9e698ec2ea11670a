use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;
use tracing::trace;

use crate::traits::Delivery;
use crate::traits::Subscriber;
use crate::types::ChangeEvent;
use crate::types::EventKind;

pub type SubscriberId = u64;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub dropped:   usize,
    pub pruned:    usize,
}

/// The set of connected real-time subscribers.
///
/// Broadcasting works on a snapshot of the set, so subscribers may join or leave at any moment. A slow or dead
/// subscriber costs nothing to the others: delivery never waits.
#[derive(Debug, Default)]
pub struct NotificationHub {
    next_id:     AtomicU64,
    subscribers: RwLock<HashMap<SubscriberId, Arc<dyn Subscriber>>>,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&self, subscriber: Arc<dyn Subscriber>) -> SubscriberId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.subscribers.write().insert(id, subscriber);
        debug!(subscriber = id, "Subscriber joined");
        id
    }

    /// Joins a channel-backed subscriber and hands back its receiving end.
    pub fn channel(&self, capacity: usize) -> (SubscriberId, mpsc::Receiver<ChangeEvent>) {
        let (subscriber, rx) = ChannelSubscriber::new(capacity);
        (self.join(Arc::new(subscriber)), rx)
    }

    pub fn leave(&self, id: SubscriberId) -> bool {
        let removed = self.subscribers.write().remove(&id).is_some();
        if removed {
            debug!(subscriber = id, "Subscriber left");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.read().is_empty()
    }

    /// Best-effort delivery of `event` to everyone currently joined.
    pub fn broadcast(&self, event: &ChangeEvent) -> BroadcastReport {
        let snapshot = self
            .subscribers
            .read()
            .iter()
            .map(|(id, s)| (*id, s.clone()))
            .collect::<Vec<_>>();

        let mut report = BroadcastReport::default();
        let mut gone = Vec::new();

        for (id, subscriber) in snapshot {
            match subscriber.deliver(event) {
                Delivery::Delivered => report.delivered += 1,
                Delivery::Dropped => {
                    report.dropped += 1;
                    debug!(subscriber = id, event = %event.event, "Subscriber is lagging, event dropped");
                }
                Delivery::Gone => gone.push(id),
            }
        }

        if !gone.is_empty() {
            let mut subscribers = self.subscribers.write();
            for id in gone {
                if subscribers.remove(&id).is_some() {
                    report.pruned += 1;
                }
            }
        }

        trace!(event = %event.event, vin = event.vin(), ?report, "Broadcast");
        report
    }
}

/// Subscriber fed through a bounded channel; a full channel drops the event.
#[derive(Debug)]
pub struct ChannelSubscriber {
    tx: mpsc::Sender<ChangeEvent>,
}

impl ChannelSubscriber {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ChangeEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl Subscriber for ChannelSubscriber {
    fn deliver(&self, event: &ChangeEvent) -> Delivery {
        match self.tx.try_send(event.clone()) {
            Ok(()) => Delivery::Delivered,
            Err(TrySendError::Full(_)) => Delivery::Dropped,
            Err(TrySendError::Closed(_)) => Delivery::Gone,
        }
    }
}

/// Keeps every event it receives. Handy wherever deliveries need to be inspected.
#[derive(Debug, Default)]
pub struct RecordingSubscriber {
    events: Mutex<Vec<ChangeEvent>>,
    gone:   AtomicBool,
}

impl RecordingSubscriber {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<ChangeEvent> {
        self.events.lock().clone()
    }

    pub fn events_of(&self, kind: EventKind) -> Vec<ChangeEvent> {
        self.events.lock().iter().filter(|e| e.event == kind).cloned().collect()
    }

    /// VINs of received events of the given kind, in arrival order.
    pub fn vins_of(&self, kind: EventKind) -> Vec<String> {
        self.events_of(kind)
            .iter()
            .filter_map(|e| e.vin().map(str::to_owned))
            .collect()
    }

    /// Make the next deliveries report the subscriber as disconnected.
    pub fn disconnect(&self) {
        self.gone.store(true, Ordering::Release);
    }
}

impl Subscriber for RecordingSubscriber {
    fn deliver(&self, event: &ChangeEvent) -> Delivery {
        if self.gone.load(Ordering::Acquire) {
            return Delivery::Gone;
        }
        self.events.lock().push(event.clone());
        Delivery::Delivered
    }
}
