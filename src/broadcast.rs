//! Fan-out of log records to every attached subscriber.
//!
//! Each subscriber owns an unbounded queue, so a slow reader only grows its
//! own backlog and never holds up publishing or other subscribers. Records
//! published while nobody is attached are dropped: this is a live feed.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tracing::debug;

use crate::log_record::LogRecord;

type Registry = HashMap<u64, mpsc::UnboundedSender<Arc<LogRecord>>>;

#[derive(Default)]
struct Shared {
    next_id: AtomicU64,
    subscribers: Mutex<Registry>,
}

impl Shared {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        // A panic while holding the lock cannot leave the map half-updated,
        // so a poisoned registry is still usable.
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn remove(&self, id: u64) -> bool {
        let removed = self.registry().remove(&id).is_some();
        if removed {
            debug!(subscriber = id, "subscriber detached");
        }
        removed
    }
}

/// Cloneable handle to the subscriber registry.
#[derive(Clone, Default)]
pub struct Broadcaster {
    shared: Arc<Shared>,
}

impl fmt::Debug for Broadcaster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Broadcaster")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `record` to every registered subscriber.
    ///
    /// Returns how many subscribers it was queued for. Subscribers whose
    /// receiving side has gone away are pruned.
    pub fn publish(&self, record: LogRecord) -> usize {
        let record = Arc::new(record);
        let mut registry = self.shared.registry();
        let before = registry.len();
        registry.retain(|_, tx| tx.send(Arc::clone(&record)).is_ok());
        if registry.len() < before {
            debug!(pruned = before - registry.len(), "dropped closed subscribers");
        }
        registry.len()
    }

    /// Attach a new subscriber. It receives every record published after
    /// this call returns, and nothing published before.
    pub fn subscribe(&self) -> SubscriberChannel {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.registry().insert(id, tx);
        debug!(subscriber = id, "subscriber attached");

        SubscriberChannel {
            id,
            rx,
            shared: Arc::clone(&self.shared),
            attached: true,
        }
    }

    /// Detach `channel`. Equivalent to dropping it.
    pub fn unsubscribe(&self, mut channel: SubscriberChannel) {
        channel.detach();
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.registry().len()
    }
}

/// A subscriber's ordered view of the broadcast feed.
///
/// Dropping the channel unregisters it from the [`Broadcaster`].
pub struct SubscriberChannel {
    id: u64,
    rx: mpsc::UnboundedReceiver<Arc<LogRecord>>,
    shared: Arc<Shared>,
    attached: bool,
}

impl fmt::Debug for SubscriberChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberChannel")
            .field("id", &self.id)
            .field("attached", &self.attached)
            .finish()
    }
}

impl SubscriberChannel {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Wait for the next record. Returns `None` once the channel has been
    /// detached and its queue is drained.
    pub async fn recv(&mut self) -> Option<Arc<LogRecord>> {
        self.rx.recv().await
    }

    /// Take the next record if one is already queued.
    pub fn try_recv(&mut self) -> Option<Arc<LogRecord>> {
        self.rx.try_recv().ok()
    }

    /// Remove this channel from the registry. Safe to call more than once;
    /// only the first call has an effect.
    pub fn detach(&mut self) {
        if self.attached {
            self.attached = false;
            self.shared.remove(self.id);
            self.rx.close();
        }
    }
}

impl Drop for SubscriberChannel {
    fn drop(&mut self) {
        self.detach();
    }
}
