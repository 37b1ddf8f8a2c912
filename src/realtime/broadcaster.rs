use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use tokio::sync::{
    mpsc::{self, error::TrySendError},
    RwLock,
};
use tracing::{debug, info};

use super::{AuthorizationFilter, BroadcastEvent, ObserverId, ObserverSubscription};

struct Observer {
    subscription: ObserverSubscription,
    tx: mpsc::Sender<Arc<BroadcastEvent>>,
}

struct Inner {
    observers: RwLock<HashMap<ObserverId, Observer>>,
    filter: Arc<dyn AuthorizationFilter>,
    queue_capacity: usize,
    next_id: AtomicU64,
}

/// Registry of connected observers and fan-out of events to them.
///
/// Cheap to clone; all clones share one registry. Each observer gets its own
/// bounded FIFO queue, so a slow reader only ever loses its own events and
/// never delays `broadcast`.
#[derive(Clone)]
pub struct Broadcaster {
    inner: Arc<Inner>,
}

/// Receiving end handed to a newly connected observer.
pub struct ObserverHandle {
    pub id: ObserverId,
    pub events: mpsc::Receiver<Arc<BroadcastEvent>>,
}

impl Broadcaster {
    pub fn new(filter: Arc<dyn AuthorizationFilter>, queue_capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                observers: RwLock::new(HashMap::new()),
                filter,
                queue_capacity: queue_capacity.max(1),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register an observer following `device_id` (if any).
    pub async fn connect(&self, user: Option<String>, device_id: Option<String>) -> ObserverHandle {
        let id = ObserverId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, events) = mpsc::channel(self.inner.queue_capacity);
        let subscription = ObserverSubscription { id, user, device_id };

        info!(
            observer = %id,
            user = ?subscription.user,
            device_id = ?subscription.device_id,
            "Observer connected"
        );
        self.inner
            .observers
            .write()
            .await
            .insert(id, Observer { subscription, tx });

        ObserverHandle { id, events }
    }

    pub async fn disconnect(&self, id: ObserverId) {
        if self.inner.observers.write().await.remove(&id).is_some() {
            info!(observer = %id, "Observer disconnected");
        }
    }

    /// Point an existing observer at another device (or none). Returns `false`
    /// if the observer is no longer connected.
    pub async fn resubscribe(&self, id: ObserverId, device_id: Option<String>) -> bool {
        match self.inner.observers.write().await.get_mut(&id) {
            Some(observer) => {
                debug!(observer = %id, device_id = ?device_id, "Observer resubscribed");
                observer.subscription.device_id = device_id;
                true
            }
            None => false,
        }
    }

    pub async fn observer_count(&self) -> usize {
        self.inner.observers.read().await.len()
    }

    /// Deliver `event` to every observer authorized for it right now. Events
    /// without a device reach everyone. Returns how many queues accepted it.
    ///
    /// Observers whose queue is full miss this event; observers whose queue is
    /// closed are unregistered.
    pub async fn broadcast(&self, event: BroadcastEvent) -> usize {
        let event = Arc::new(event);
        let mut delivered = 0;
        let mut gone = Vec::new();

        {
            let observers = self.inner.observers.read().await;
            for (id, observer) in observers.iter() {
                let allowed = match event.device_id() {
                    Some(device_id) => self
                        .inner
                        .filter
                        .is_authorized(&observer.subscription, device_id),
                    None => true,
                };
                if !allowed {
                    continue;
                }

                match observer.tx.try_send(Arc::clone(&event)) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        debug!(observer = %id, "Observer queue full; event dropped");
                    }
                    Err(TrySendError::Closed(_)) => gone.push(*id),
                }
            }
        }

        if !gone.is_empty() {
            let mut observers = self.inner.observers.write().await;
            for id in gone {
                observers.remove(&id);
                debug!(observer = %id, "Removed observer with closed queue");
            }
        }

        delivered
    }
}
