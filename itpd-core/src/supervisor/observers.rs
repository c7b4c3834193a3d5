//! State observer registry and the ordered dispatcher

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, trace};
use uuid::Uuid;

use crate::state::StateChange;

/// Receives every state notification, in order.
///
/// Called from the supervisor's dispatcher task; a slow observer delays
/// later notifications but never loses them. Closures of the form
/// `Fn(&StateChange) + Send + Sync` implement this trait.
pub trait StateObserver: Send + Sync {
    fn on_state_change(&self, change: &StateChange);
}

impl<F> StateObserver for F
where
    F: Fn(&StateChange) + Send + Sync,
{
    fn on_state_change(&self, change: &StateChange) {
        self(change)
    }
}

/// Registration handle returned by `add_state_observer`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObserverId(Uuid);

impl ObserverId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ObserverId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Default)]
pub(crate) struct ObserverRegistry {
    observers: RwLock<Vec<(ObserverId, Arc<dyn StateObserver>)>>,
}

impl ObserverRegistry {
    pub(crate) fn add(&self, observer: Arc<dyn StateObserver>) -> ObserverId {
        let id = ObserverId::new();
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, observer));
        debug!(observer = %id, "State observer added");
        id
    }

    pub(crate) fn remove(&self, id: ObserverId) -> bool {
        let mut observers = self
            .observers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        let removed = observers.len() != before;
        if removed {
            debug!(observer = %id, "State observer removed");
        }
        removed
    }

    pub(crate) fn len(&self) -> usize {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn snapshot(&self) -> Vec<(ObserverId, Arc<dyn StateObserver>)> {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Deliver one change to every observer registered right now.
    /// A panicking observer is logged and skipped.
    fn deliver(&self, change: &StateChange) {
        for (id, observer) in self.snapshot() {
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
                observer.on_state_change(change);
            }));
            if result.is_err() {
                error!(observer = %id, seq = change.seq, "State observer panicked");
            }
        }
    }
}

/// Messages on the notification channel
pub(crate) enum Dispatch {
    Change(StateChange),
    /// Acknowledge once everything queued before it is delivered, then stop
    Close(oneshot::Sender<()>),
}

/// Drain the notification channel into the registry, one change at a time
pub(crate) async fn run_dispatcher(
    registry: Arc<ObserverRegistry>,
    mut rx: mpsc::UnboundedReceiver<Dispatch>,
) {
    while let Some(message) = rx.recv().await {
        match message {
            Dispatch::Change(change) => {
                trace!(seq = change.seq, from = %change.from, to = %change.to, "Dispatching");
                registry.deliver(&change);
            }
            Dispatch::Close(ack) => {
                let _ = ack.send(());
                break;
            }
        }
    }
    debug!("State dispatcher stopped");
}
