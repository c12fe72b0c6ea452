//! Per-document progress fan-out.
//!
//! Observers subscribe to a document and receive its run's progress
//! events through a bounded channel. Publishing never blocks the run:
//! an observer whose buffer is full is disconnected instead.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::progress::ProgressEvent;

/// Per-observer channel capacity when the config does not override it
pub const DEFAULT_OBSERVER_BUFFER: usize = 64;

struct ObserverSlot {
    id: u64,
    tx: mpsc::Sender<ProgressEvent>,
}

/// Fan-out hub for run progress events
pub struct ProgressBus {
    observers: DashMap<String, Vec<ObserverSlot>>,
    buffer: usize,
    next_id: AtomicU64,
}

/// A single observer's end of the bus.
///
/// Receives events for one document until the run reaches a terminal
/// state, the observer falls behind, or it unsubscribes. After any of
/// those, `recv` yields `None`.
pub struct Subscription {
    document_id: String,
    id: u64,
    rx: mpsc::Receiver<ProgressEvent>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ProgressEvent> {
        self.rx.try_recv().ok()
    }
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new(DEFAULT_OBSERVER_BUFFER)
    }
}

impl ProgressBus {
    pub fn new(buffer: usize) -> Self {
        Self {
            observers: DashMap::new(),
            // zero-capacity channels are not a thing in tokio
            buffer: buffer.max(1),
            next_id: AtomicU64::new(0),
        }
    }

    /// Register an observer for a document's events.
    ///
    /// Subscribing is independent of whether a run is active; events
    /// published before the subscription are not replayed.
    pub fn subscribe(&self, document_id: &str) -> Subscription {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.observers
            .entry(document_id.to_string())
            .or_default()
            .push(ObserverSlot { id, tx });
        debug!(doc_id = %document_id, observer = id, "Progress observer subscribed");
        Subscription {
            document_id: document_id.to_string(),
            id,
            rx,
        }
    }

    /// Remove an observer. Idempotent and safe to call while a publish
    /// for the same document is in flight.
    pub fn unsubscribe(&self, subscription: &Subscription) {
        if let Some(mut slots) = self.observers.get_mut(&subscription.document_id) {
            slots.retain(|slot| slot.id != subscription.id);
        }
        self.observers
            .remove_if(&subscription.document_id, |_, slots| slots.is_empty());
    }

    /// Deliver an event to every observer of its document.
    ///
    /// Delivery is `try_send` into each bounded channel. A full buffer
    /// disconnects that observer; the publisher is never delayed. A
    /// terminal event tears down the document's fan-out entry, which
    /// closes all remaining channels after the event is consumed.
    pub fn publish(&self, event: &ProgressEvent) {
        let now_empty = if let Some(mut slots) = self.observers.get_mut(&event.document_id) {
            slots.retain(|slot| match slot.tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        doc_id = %event.document_id,
                        observer = slot.id,
                        "Progress observer fell behind, disconnecting it"
                    );
                    metrics::counter!("scrivener_observers_dropped_total").increment(1);
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            });
            slots.is_empty()
        } else {
            return;
        };

        if event.is_terminal() {
            self.observers.remove(&event.document_id);
        } else if now_empty {
            self.observers
                .remove_if(&event.document_id, |_, slots| slots.is_empty());
        }
    }

    /// Number of live observers for a document
    pub fn observer_count(&self, document_id: &str) -> usize {
        self.observers
            .get(document_id)
            .map(|slots| slots.len())
            .unwrap_or(0)
    }
}
