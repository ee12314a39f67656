use super::types::{Subscriber, Subscription, SubscriptionId};
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{trace, warn};

type Registry = HashMap<Arc<str>, Vec<(SubscriptionId, Subscriber)>>;

struct Inner {
    channels: RwLock<Registry>,
    next_id: AtomicU64,
}

/// Channel-keyed publish/subscribe bus with synchronous, in-order delivery.
///
/// Cloning is cheap and every clone shares the same registrations. Callbacks
/// run without any bus lock held, so a callback may itself subscribe,
/// unsubscribe or publish. Registrations made during a delivery are not
/// invoked for that delivery.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl EventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                channels: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register `callback` on `channel`.
    ///
    /// Delivery order is registration order. The returned handle is the only
    /// way to remove this registration.
    pub fn subscribe<F>(&self, channel: &str, callback: F) -> Subscription
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let channel: Arc<str> = Arc::from(channel);

        let mut channels = self
            .inner
            .channels
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        channels
            .entry(Arc::clone(&channel))
            .or_default()
            .push((id, Arc::new(callback)));

        trace!(channel = %channel, subscription = %id, "Subscriber registered");
        Subscription { channel, id }
    }

    /// Register one callback on several channels.
    ///
    /// The callback receives the channel name along with the arguments.
    /// Handles come back in the order of `channels`; each removes only its
    /// own registration.
    pub fn subscribe_many<F>(&self, channels: &[&str], callback: F) -> Vec<Subscription>
    where
        F: Fn(&str, &[Value]) + Send + Sync + 'static,
    {
        let callback = Arc::new(callback);
        channels
            .iter()
            .map(|channel| {
                let callback = Arc::clone(&callback);
                let name: Arc<str> = Arc::from(*channel);
                self.subscribe(channel, move |args: &[Value]| callback(&name, args))
            })
            .collect()
    }

    /// Remove a registration. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        let mut channels = self
            .inner
            .channels
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let Some(subscribers) = channels.get_mut(&subscription.channel) else {
            return false;
        };
        let before = subscribers.len();
        subscribers.retain(|(id, _)| *id != subscription.id);
        let removed = subscribers.len() != before;
        if subscribers.is_empty() {
            channels.remove(&subscription.channel);
        }

        if removed {
            trace!(channel = %subscription.channel, subscription = %subscription.id, "Subscriber removed");
        }
        removed
    }

    /// Publish `args` to every subscriber currently on `channel`.
    ///
    /// Returns the number of subscribers invoked. A panicking subscriber is
    /// logged and skipped; the remaining subscribers still run. With no
    /// subscribers the event is dropped.
    pub fn publish(&self, channel: &str, args: &[Value]) -> usize {
        let snapshot: Vec<(SubscriptionId, Subscriber)> = {
            let channels = self
                .inner
                .channels
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            match channels.get(channel) {
                Some(subscribers) => subscribers.clone(),
                None => return 0,
            }
        };

        for (id, subscriber) in &snapshot {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| subscriber(args))) {
                warn!(
                    channel = %channel,
                    subscription = %id,
                    error = %panic_message(panic.as_ref()),
                    "Subscriber panicked during delivery"
                );
            }
        }

        trace!(channel = %channel, delivered = snapshot.len(), "Event published");
        snapshot.len()
    }

    /// Number of subscribers on `channel`.
    #[must_use]
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.inner
            .channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(channel)
            .map_or(0, Vec::len)
    }

    /// Number of channels with at least one subscriber.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.inner
            .channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("channels", &self.channel_count())
            .finish()
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
