//! Bootbridge Core - bootstrap sequence for precompiled modules
//!
//! This crate provides:
//! - A process-wide event bus with snapshot dispatch
//! - A readiness signal that fires once
//! - The loading state machine and module loader
//! - The typed message bridge between host and module
//! - Overlay and error reporter contracts
//! - The [`Bootstrapper`] that wires all of the above together

#![forbid(unsafe_code)]

pub mod bootstrap;
pub mod bridge;
pub mod config;
pub mod context;
pub mod error;
pub mod event_bus;
pub mod loader;
pub mod overlay;
pub mod readiness;
pub mod reporter;
pub mod testing;

pub use bootstrap::{Bootstrapper, Session};
pub use bridge::{Bridge, Message, MessageKind};
pub use config::{
    BootstrapConfig, ChannelsConfig, FetchConfig, LifecycleConfig, LogFormat, LoggingConfig,
    ModuleConfig, OverlayConfig, ReadinessConfig, ReplayPolicy,
};
pub use context::{ModuleContext, ReadyGate};
pub use error::{format_error_for_overlay, BootstrapError, Error, Result, UserFriendlyError};
pub use event_bus::{EventBus, Subscriber, Subscription, SubscriptionId};
pub use loader::{
    LoadingState, LoadingStateCell, ModuleHandle, ModuleInstance, ModuleLoader, ModuleRuntime,
    ModuleSource, PayloadFetcher, RunningModule, SourceFetcher,
};
pub use overlay::{NoopOverlay, Overlay, OverlayGuard, TracingOverlay};
pub use readiness::ReadinessSignal;
pub use reporter::{CollectingReporter, ErrorReporter, TracingReporter};
