//! Error types for bootbridge-core
//!
//! Every failure of the bootstrap sequence is an [`Error`]. The three terminal
//! kinds mirror the stages of loading: fetching the payload, instantiating it
//! against the import surface, and running it.

use thiserror::Error;

use crate::loader::LoadingState;

/// Core error type
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Network or filesystem failure retrieving the module payload
    #[error("fetch error ({source_location}): {message}")]
    Fetch {
        /// Where the payload was requested from
        source_location: String,
        /// Transport failure description
        message: String,
    },

    /// Payload malformed or incompatible with the import surface
    #[error("instantiation error: {0}")]
    Instantiation(String),

    /// Module raised while running
    #[error("execution error: {0}")]
    Execution(String),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Loading state machine refused a transition
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition {
        /// State the cell was in
        from: LoadingState,
        /// State that was requested
        to: LoadingState,
    },

    /// Payload (de)serialization failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

/// Alias used at the bootstrap boundary.
pub type BootstrapError = Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a fetch error
    #[must_use]
    pub fn fetch(source_location: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Fetch {
            source_location: source_location.into(),
            message: message.into(),
        }
    }

    /// Create an instantiation error
    #[must_use]
    pub fn instantiation(msg: impl Into<String>) -> Self {
        Self::Instantiation(msg.into())
    }

    /// Create an execution error
    #[must_use]
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }

    /// Create a configuration error
    #[must_use]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Whether this error ends the bootstrap sequence.
    ///
    /// None of these are retried.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Fetch { .. } | Self::Instantiation(_) | Self::Execution(_)
        )
    }

    /// Stable error code for reporters
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Fetch { .. } => "fetch_error",
            Self::Instantiation(_) => "instantiation_error",
            Self::Execution(_) => "execution_error",
            Self::Configuration(_) => "configuration_error",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::Serialization(_) => "serialization_error",
            Self::Internal(_) => "internal_error",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let location = err
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "<unknown>".to_string());
        Self::fetch(location, err.to_string())
    }
}

/// Trait for user-facing error messages
///
/// The overlay shows these instead of the raw error when bootstrap fails.
pub trait UserFriendlyError {
    /// Get a user-friendly error message
    fn user_message(&self) -> String;

    /// Get a suggestion for how to fix the error
    fn suggestion(&self) -> Option<String>;
}

impl UserFriendlyError for Error {
    fn user_message(&self) -> String {
        match self {
            Error::Fetch {
                source_location, ..
            } => format!("Could not download the module from '{}'.", source_location),
            Error::Instantiation(msg) => format!("The module could not be started: {}", msg),
            Error::Execution(msg) => format!("The module stopped with an error: {}", msg),
            Error::Configuration(msg) => format!("Configuration error: {}", msg),
            Error::InvalidTransition { from, to } => {
                format!("Loading went out of order ({} -> {}).", from, to)
            }
            Error::Serialization(msg) => format!("A message could not be encoded: {}", msg),
            Error::Internal(msg) => format!("Internal error: {}", msg),
        }
    }

    fn suggestion(&self) -> Option<String> {
        match self {
            Error::Fetch { .. } => {
                Some("Check the module.source setting and your network connection.".to_string())
            }
            Error::Instantiation(_) => Some(
                "Make sure the module was built for this host and its imports are provided."
                    .to_string(),
            ),
            Error::Configuration(_) => {
                Some("Check config/default.toml or BOOTBRIDGE_* environment variables.".to_string())
            }
            _ => None,
        }
    }
}

/// Format an error for display on the loading overlay
pub fn format_error_for_overlay(error: &Error) -> String {
    let mut output = error.user_message();

    if let Some(suggestion) = error.suggestion() {
        output.push('\n');
        output.push_str(&suggestion);
    }

    output
}
