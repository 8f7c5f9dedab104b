//! Per-project progress fan-out

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::progress::event::{ProgressEvent, ProgressSink};

type Senders = HashMap<u64, mpsc::UnboundedSender<ProgressEvent>>;

/// Delivers progress events to every subscriber of a project.
///
/// Delivery is best-effort: a subscriber whose receiver is gone is pruned
/// on the next broadcast, and nothing is buffered for projects without
/// subscribers.
#[derive(Debug, Default)]
pub struct ProgressBroadcaster {
    subscribers: RwLock<HashMap<u64, Senders>>,
    next_id: AtomicU64,
}

impl ProgressBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register for a project's events. Dropping the subscription unregisters it.
    pub fn subscribe(self: &Arc<Self>, project_id: u64) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut subscribers = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
            subscribers.entry(project_id).or_default().insert(id, tx);
        }
        debug!("Subscriber {} registered for project {}", id, project_id);
        Subscription {
            id,
            project_id,
            receiver: rx,
            broadcaster: Arc::downgrade(self),
        }
    }

    /// Remove one subscriber. Unknown ids are ignored.
    pub fn unsubscribe(&self, project_id: u64, subscriber_id: u64) {
        let mut subscribers = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        if let Some(senders) = subscribers.get_mut(&project_id) {
            senders.remove(&subscriber_id);
            if senders.is_empty() {
                subscribers.remove(&project_id);
            }
        }
    }

    /// Send an event to every live subscriber of `project_id`
    pub fn broadcast(&self, project_id: u64, event: ProgressEvent) {
        let mut subscribers = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        let Some(senders) = subscribers.get_mut(&project_id) else {
            trace!("No subscribers for project {}", project_id);
            return;
        };

        senders.retain(|id, tx| {
            let delivered = tx.send(event.clone()).is_ok();
            if !delivered {
                debug!("Pruning closed subscriber {} of project {}", id, project_id);
            }
            delivered
        });
        if senders.is_empty() {
            subscribers.remove(&project_id);
        }
    }

    pub fn subscriber_count(&self, project_id: u64) -> usize {
        let subscribers = self.subscribers.read().unwrap_or_else(|e| e.into_inner());
        subscribers.get(&project_id).map_or(0, |s| s.len())
    }
}

impl ProgressSink for ProgressBroadcaster {
    fn publish(&self, project_id: u64, event: ProgressEvent) {
        self.broadcast(project_id, event);
    }
}

/// Receiving end of a project subscription
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    project_id: u64,
    receiver: mpsc::UnboundedReceiver<ProgressEvent>,
    broadcaster: Weak<ProgressBroadcaster>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn project_id(&self) -> u64 {
        self.project_id
    }

    /// Next event, or `None` once the broadcaster is gone
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.receiver.recv().await
    }

    /// Next already-delivered event, without waiting
    pub fn try_recv(&mut self) -> Option<ProgressEvent> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(broadcaster) = self.broadcaster.upgrade() {
            broadcaster.unsubscribe(self.project_id, self.id);
        }
    }
}
