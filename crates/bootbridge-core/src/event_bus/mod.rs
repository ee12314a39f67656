//! EventBus - named-channel publish/subscribe shared by host and module.
//!
//! Delivery is synchronous: `publish` runs every subscriber of the channel on
//! the calling thread before it returns.

/// Core event bus implementation.
pub mod bus;
/// Subscription handles and callback types.
pub mod types;

pub use bus::EventBus;
pub use types::{Subscriber, Subscription, SubscriptionId};
