use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Callback registered on a channel. Receives the published arguments as-is.
pub type Subscriber = Arc<dyn Fn(&[Value]) + Send + Sync>;

/// Unique identifier of one registration on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub(crate) u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Handle returned by [`EventBus::subscribe`](super::EventBus::subscribe).
///
/// Removal goes through this handle, so two identical-looking callbacks on the
/// same channel stay independently removable. Dropping the handle does not
/// unsubscribe.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    pub(crate) channel: Arc<str>,
    pub(crate) id: SubscriptionId,
}

impl Subscription {
    /// Channel this subscription listens on
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Registration identifier
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }
}
