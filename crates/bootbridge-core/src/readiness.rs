//! Readiness signal
//!
//! A single-fire notification on the event bus. "The module is running" and
//! "the module is ready" are different events: the module fires readiness
//! itself, after its own setup, through the [`ReadyGate`](crate::ReadyGate).
//!
//! Subscribers registered after the signal fired are handled according to the
//! [`ReplayPolicy`]: `Latch` runs them immediately, `Event` never runs them.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::ReplayPolicy;
use crate::event_bus::bus::panic_message;
use crate::event_bus::{EventBus, Subscription};

struct Inner {
    bus: EventBus,
    channel: String,
    policy: ReplayPolicy,
    fired: AtomicBool,
    fired_tx: watch::Sender<bool>,
}

/// Fire-once readiness notification.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ReadinessSignal {
    inner: Arc<Inner>,
}

impl ReadinessSignal {
    /// Create a signal that publishes on `channel` of `bus`.
    #[must_use]
    pub fn new(bus: EventBus, channel: impl Into<String>, policy: ReplayPolicy) -> Self {
        let (fired_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                bus,
                channel: channel.into(),
                policy,
                fired: AtomicBool::new(false),
                fired_tx,
            }),
        }
    }

    /// Run `callback` when the signal fires.
    ///
    /// Each callback runs at most once, even if something else publishes on
    /// the ready channel. If the signal already fired, the callback runs now
    /// under [`ReplayPolicy::Latch`] and never under [`ReplayPolicy::Event`].
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: FnOnce() + Send + 'static,
    {
        let slot = Arc::new(Mutex::new(Some(callback)));
        let bus_slot = Arc::clone(&slot);
        let subscription = self.inner.bus.subscribe(&self.inner.channel, move |_args: &[Value]| {
            run_once(&bus_slot);
        });

        if self.is_fired() {
            match self.inner.policy {
                ReplayPolicy::Latch => {
                    debug!(channel = %self.inner.channel, "Replaying readiness to late subscriber");
                    self.inner.bus.unsubscribe(&subscription);
                    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| run_once(&slot))) {
                        warn!(
                            channel = %self.inner.channel,
                            error = %panic_message(panic.as_ref()),
                            "Late readiness subscriber panicked"
                        );
                    }
                }
                ReplayPolicy::Event => {
                    self.inner.bus.unsubscribe(&subscription);
                    debug!(channel = %self.inner.channel, "Readiness already fired; late subscriber will not run");
                }
            }
        }

        subscription
    }

    /// Remove a readiness subscriber that has not run yet.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        self.inner.bus.unsubscribe(subscription)
    }

    /// Deliver the ready event to all registered subscribers.
    ///
    /// Only the first call does anything; it returns `true`. Later calls
    /// return `false` and invoke nobody.
    pub fn fire(&self) -> bool {
        if self.inner.fired.swap(true, Ordering::SeqCst) {
            debug!(channel = %self.inner.channel, "Readiness signal already fired");
            return false;
        }

        let delivered = self.inner.bus.publish(&self.inner.channel, &[]);
        // Waiters resume only once every subscriber has returned.
        self.inner.fired_tx.send_replace(true);
        info!(channel = %self.inner.channel, delivered, "Readiness signal fired");
        true
    }

    /// Whether `fire` has run
    #[must_use]
    pub fn is_fired(&self) -> bool {
        self.inner.fired.load(Ordering::SeqCst)
    }

    /// Resolve once the signal has fired and its subscribers have run.
    ///
    /// Always remembers a past firing, whatever the replay policy.
    pub async fn wait(&self) {
        let mut rx = self.inner.fired_tx.subscribe();
        // The sender lives as long as `self`, so this cannot observe a close.
        let _ = rx.wait_for(|fired| *fired).await;
    }

    /// Bus channel the signal publishes on
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.inner.channel
    }

    /// Late-subscriber policy
    #[must_use]
    pub fn policy(&self) -> ReplayPolicy {
        self.inner.policy
    }
}

impl std::fmt::Debug for ReadinessSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadinessSignal")
            .field("channel", &self.inner.channel)
            .field("policy", &self.inner.policy)
            .field("fired", &self.is_fired())
            .finish()
    }
}

fn run_once<F: FnOnce()>(slot: &Mutex<Option<F>>) {
    let callback = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
    if let Some(callback) = callback {
        callback();
    }
}
