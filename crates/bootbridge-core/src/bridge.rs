//! Message bridge between host code and the running module.
//!
//! Every message travels on one well-known bus channel as a two-argument
//! event `[type, payload]`. The type tag is carried inside the event rather
//! than in the channel name, so neither side needs to register channels
//! dynamically.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::Result;
use crate::event_bus::{EventBus, Subscription};

/// A typed message as exchanged over the bridge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Application-defined type tag
    #[serde(rename = "type")]
    pub message_type: String,
    /// Arbitrary JSON payload
    pub payload: Value,
}

impl Message {
    #[must_use]
    pub fn new(message_type: impl Into<String>, payload: Value) -> Self {
        Self {
            message_type: message_type.into(),
            payload,
        }
    }

    /// Decode the payload into `T`.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    /// Rebuild a message from raw bus arguments.
    ///
    /// Returns `None` unless `args` is exactly `[string, payload]`.
    #[must_use]
    pub fn from_args(args: &[Value]) -> Option<Self> {
        match args {
            [Value::String(message_type), payload] => Some(Self::new(message_type.clone(), payload.clone())),
            _ => None,
        }
    }

    fn into_args(self) -> [Value; 2] {
        [Value::String(self.message_type), self.payload]
    }
}

/// Built-in notification kinds. Their payload is a plain text string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Info,
    Success,
    Warning,
    Error,
}

impl MessageKind {
    pub const ALL: [MessageKind; 4] = [Self::Info, Self::Success, Self::Warning, Self::Error];

    /// Type tag used on the wire
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }

    /// Kind for a wire type tag, if it is one of the built-ins.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == tag)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bidirectional `(type, payload)` channel shared by host and module.
///
/// Sends from one side keep their relative order. There is no
/// acknowledgement and nothing is buffered for listeners registered later.
#[derive(Debug, Clone)]
pub struct Bridge {
    bus: EventBus,
    channel: Arc<str>,
}

impl Bridge {
    /// Wire a bridge onto `channel` of `bus`.
    #[must_use]
    pub fn new(bus: EventBus, channel: impl Into<String>) -> Self {
        Self {
            bus,
            channel: Arc::from(channel.into()),
        }
    }

    /// Publish a message. Returns the number of listeners that received it.
    pub fn send_message(&self, message_type: impl Into<String>, payload: Value) -> usize {
        let message = Message::new(message_type, payload);
        debug!(channel = %self.channel, message_type = %message.message_type, "Sending bridge message");
        self.bus.publish(&self.channel, &message.into_args())
    }

    /// Serialize `payload` and publish it.
    pub fn send<T>(&self, message_type: impl Into<String>, payload: &T) -> Result<usize>
    where
        T: Serialize + ?Sized,
    {
        let payload = serde_json::to_value(payload)?;
        Ok(self.send_message(message_type, payload))
    }

    /// Send a built-in notification with a text payload.
    pub fn send_kind(&self, kind: MessageKind, text: impl Into<String>) -> usize {
        self.send_message(kind.as_str(), Value::String(text.into()))
    }

    pub fn send_info(&self, text: impl Into<String>) -> usize {
        self.send_kind(MessageKind::Info, text)
    }

    pub fn send_success(&self, text: impl Into<String>) -> usize {
        self.send_kind(MessageKind::Success, text)
    }

    pub fn send_warning(&self, text: impl Into<String>) -> usize {
        self.send_kind(MessageKind::Warning, text)
    }

    pub fn send_error(&self, text: impl Into<String>) -> usize {
        self.send_kind(MessageKind::Error, text)
    }

    /// Listen for every message. The callback receives `(type, payload)`.
    ///
    /// Events on the channel that are not a `[type, payload]` pair are
    /// logged and skipped.
    pub fn on_message<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        let channel = Arc::clone(&self.channel);
        self.bus.subscribe(&self.channel, move |args: &[Value]| match args {
            [Value::String(message_type), payload] => callback(message_type, payload),
            _ => warn!(channel = %channel, args = args.len(), "Malformed bridge event ignored"),
        })
    }

    /// Listen for messages tagged `message_type`, decoding the payload as `T`.
    ///
    /// Payloads that fail to decode are logged and skipped.
    pub fn on_typed<T, F>(&self, message_type: impl Into<String>, callback: F) -> Subscription
    where
        T: DeserializeOwned,
        F: Fn(T) + Send + Sync + 'static,
    {
        let wanted = message_type.into();
        self.on_message(move |message_type, payload| {
            if message_type != wanted {
                return;
            }
            match serde_json::from_value::<T>(payload.clone()) {
                Ok(decoded) => callback(decoded),
                Err(e) => warn!(message_type = %message_type, error = %e, "Bridge payload did not decode"),
            }
        })
    }

    /// Listen for one built-in notification kind; the callback receives its
    /// text. Non-text payloads are logged and skipped.
    pub fn on_kind<F>(&self, kind: MessageKind, callback: F) -> Subscription
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_message(move |message_type, payload| {
            if message_type != kind.as_str() {
                return;
            }
            match payload {
                Value::String(text) => callback(text),
                other => warn!(kind = %kind, payload = %other, "Notification payload is not text"),
            }
        })
    }

    /// Stop a listener registered with `on_message`, `on_typed` or `on_kind`.
    pub fn off(&self, subscription: &Subscription) -> bool {
        self.bus.unsubscribe(subscription)
    }

    /// Bus channel carrying the messages
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.bus.subscriber_count(&self.channel)
    }
}
