use crate::{AnyError, SeriesKey};
use async_trait::async_trait;
use std::{fmt, sync::Arc};
use uuid::Uuid;

/// A consumer of change events. The callback runs on the watcher's task,
/// one subscriber after the other, so it should not block for long.
/// Returning an error never disturbs the watcher; the error is logged and
/// dispatch moves on to the next subscriber.
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// A new bar boundary was observed on `key`.
    async fn on_new_bar(&self, key: SeriesKey) -> Result<(), AnyError>;
}

/// Handle identifying one subscription, returned by
/// [`Watcher::subscribe`](crate::Watcher::subscribe).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fan-out of change events, in registration order.
pub(crate) struct Dispatcher {
    subscribers: Vec<(SubscriptionId, Arc<dyn Subscriber>)>,
}

impl Dispatcher {
    pub(crate) fn new() -> Self {
        Dispatcher {
            subscribers: Vec::new(),
        }
    }

    pub(crate) fn register(&mut self, subscriber: Arc<dyn Subscriber>) -> SubscriptionId {
        let id = SubscriptionId(Uuid::new_v4());
        self.subscribers.push((id, subscriber));
        id
    }

    pub(crate) fn unregister(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(existing, _)| *existing != id);
        self.subscribers.len() < before
    }

    pub(crate) async fn dispatch(&self, key: SeriesKey) {
        for (id, subscriber) in &self.subscribers {
            if let Err(err) = subscriber.on_new_bar(key).await {
                log::error!("Subscriber {} failed handling {}: {}", id, key, err);
            }
        }
    }
}
