// Event channel: best-effort fan-out to a dynamic subscriber set

use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};
use uuid::Uuid;

/// Why one subscriber missed an event. Never surfaced to the publisher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryFailure {
    /// Receiving side is gone; the handle gets pruned.
    #[error("subscriber disconnected")]
    Disconnected,
    /// Subscriber's buffer is full; it misses this event but stays subscribed.
    #[error("subscriber backlogged")]
    Backlogged,
}

/// Opaque reference to a party that wants published events.
///
/// Identity is the handle ID; clones refer to the same subscriber.
#[derive(Debug)]
pub struct SubscriberHandle<T> {
    id: Uuid,
    sender: mpsc::Sender<T>,
}

impl<T> Clone for SubscriberHandle<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            sender: self.sender.clone(),
        }
    }
}

impl<T> SubscriberHandle<T> {
    /// New handle plus the receiver the subscriber reads events from.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<T>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        (
            Self {
                id: Uuid::new_v4(),
                sender,
            },
            receiver,
        )
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    fn try_deliver(&self, event: T) -> Result<(), DeliveryFailure> {
        self.sender.try_send(event).map_err(|e| match e {
            TrySendError::Closed(_) => DeliveryFailure::Disconnected,
            TrySendError::Full(_) => DeliveryFailure::Backlogged,
        })
    }
}

/// Outcome of one publish, for logging.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    /// Backlogged subscribers that skipped this event
    pub missed: usize,
    /// Disconnected subscribers removed from the set
    pub pruned: usize,
}

/// Subscriber set owned by one publisher.
///
/// Not internally synchronized: the owning entity's lock serializes
/// subscribe, unsubscribe and publish.
#[derive(Debug)]
pub struct EventChannel<T> {
    subscribers: HashMap<Uuid, SubscriberHandle<T>>,
}

impl<T> Default for EventChannel<T> {
    fn default() -> Self {
        Self {
            subscribers: HashMap::new(),
        }
    }
}

impl<T: Clone> EventChannel<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscriber. Returns false if it was already subscribed.
    pub fn subscribe(&mut self, handle: SubscriberHandle<T>) -> bool {
        let id = handle.id;
        if self.subscribers.contains_key(&id) {
            return false;
        }
        self.subscribers.insert(id, handle);
        debug!(subscriber = %id, total = self.subscribers.len(), "Subscriber added");
        true
    }

    /// Remove a subscriber. Returns false if it was not subscribed.
    pub fn unsubscribe(&mut self, id: &Uuid) -> bool {
        let removed = self.subscribers.remove(id).is_some();
        if removed {
            debug!(subscriber = %id, total = self.subscribers.len(), "Subscriber removed");
        }
        removed
    }

    /// Deliver `event` to every subscriber without waiting on any of them.
    pub fn publish(&mut self, event: &T) -> PublishReport {
        let mut report = PublishReport::default();
        let mut disconnected = Vec::new();

        for (id, handle) in &self.subscribers {
            match handle.try_deliver(event.clone()) {
                Ok(()) => report.delivered += 1,
                Err(DeliveryFailure::Backlogged) => {
                    warn!(subscriber = %id, "Subscriber backlogged, event skipped");
                    report.missed += 1;
                }
                Err(DeliveryFailure::Disconnected) => disconnected.push(*id),
            }
        }

        for id in disconnected {
            self.subscribers.remove(&id);
            debug!(subscriber = %id, "Pruned disconnected subscriber");
            report.pruned += 1;
        }

        report
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.subscribers.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}
