use std::fmt;
use std::sync::{Arc, OnceLock};

use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::{Error, Result};

/// Loading phases of a module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadingState {
    /// Nothing requested yet
    NotStarted,
    /// Retrieving the payload
    Fetching,
    /// Instantiating against the import surface
    Instantiating,
    /// Entry point started; not yet ready
    Running,
    /// Module signalled readiness
    Ready,
    /// A step failed
    Failed,
}

impl LoadingState {
    /// `Ready` and `Failed` never change again.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ready | Self::Failed)
    }

    /// Whether the machine allows `self -> next`.
    #[must_use]
    pub fn can_transition_to(self, next: LoadingState) -> bool {
        use LoadingState::*;
        matches!(
            (self, next),
            (NotStarted, Fetching)
                | (Fetching, Instantiating)
                | (Instantiating, Running)
                | (Running, Ready)
                | (Fetching | Instantiating | Running, Failed)
        )
    }
}

impl fmt::Display for LoadingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "NotStarted"),
            Self::Fetching => write!(f, "Fetching"),
            Self::Instantiating => write!(f, "Instantiating"),
            Self::Running => write!(f, "Running"),
            Self::Ready => write!(f, "Ready"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

struct Inner {
    tx: watch::Sender<LoadingState>,
    failure: OnceLock<Error>,
}

/// Shared, observable loading state.
///
/// Every transition is checked against [`LoadingState::can_transition_to`];
/// the first recorded failure is kept for [`settled`](Self::settled).
#[derive(Clone)]
pub struct LoadingStateCell {
    inner: Arc<Inner>,
}

impl LoadingStateCell {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(LoadingState::NotStarted);
        Self {
            inner: Arc::new(Inner {
                tx,
                failure: OnceLock::new(),
            }),
        }
    }

    /// Current state
    #[must_use]
    pub fn get(&self) -> LoadingState {
        *self.inner.tx.borrow()
    }

    /// Move to `next`, or report why the machine refused.
    pub fn transition(&self, next: LoadingState) -> Result<()> {
        let mut from = LoadingState::NotStarted;
        let changed = self.inner.tx.send_if_modified(|state| {
            from = *state;
            if state.can_transition_to(next) {
                *state = next;
                true
            } else {
                false
            }
        });

        if changed {
            info!(from = %from, to = %next, "Loading state changed");
            Ok(())
        } else {
            Err(Error::InvalidTransition { from, to: next })
        }
    }

    /// Record `error` and move to `Failed`.
    ///
    /// Returns `false` when the state is already terminal; a module that
    /// reached `Ready` stays `Ready`.
    pub fn fail(&self, error: Error) -> bool {
        let mut from = LoadingState::NotStarted;
        // The failure is stored before waiters are notified.
        let changed = self.inner.tx.send_if_modified(|state| {
            from = *state;
            if state.can_transition_to(LoadingState::Failed) {
                let _ = self.inner.failure.set(error.clone());
                *state = LoadingState::Failed;
                true
            } else {
                false
            }
        });

        if changed {
            warn!(from = %from, error = %error, "Loading failed");
        } else {
            warn!(state = %from, error = %error, "Failure after loading settled");
        }
        changed
    }

    /// First failure recorded, if any
    #[must_use]
    pub fn failure(&self) -> Option<&Error> {
        self.inner.failure.get()
    }

    /// Watch state changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LoadingState> {
        self.inner.tx.subscribe()
    }

    /// Wait for `Ready` (Ok) or `Failed` (the recorded error).
    pub async fn settled(&self) -> Result<()> {
        let mut rx = self.subscribe();
        let state = match rx.wait_for(|s| s.is_terminal()).await {
            Ok(state) => *state,
            Err(_) => return Err(Error::Internal("loading state channel closed".to_string())),
        };

        match state {
            LoadingState::Ready => Ok(()),
            _ => Err(self
                .failure()
                .cloned()
                .unwrap_or_else(|| Error::Internal("loading failed without an error".to_string()))),
        }
    }
}

impl Default for LoadingStateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LoadingStateCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadingStateCell")
            .field("state", &self.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use LoadingState::*;

    #[test]
    fn test_happy_path() {
        let cell = LoadingStateCell::new();
        assert_eq!(cell.get(), NotStarted);
        for next in [Fetching, Instantiating, Running, Ready] {
            cell.transition(next).unwrap();
            assert_eq!(cell.get(), next);
        }
    }

    #[test]
    fn test_running_alone_is_not_ready() {
        assert!(!NotStarted.can_transition_to(Ready));
        assert!(!Fetching.can_transition_to(Ready));
        assert!(!Instantiating.can_transition_to(Ready));
        assert!(Running.can_transition_to(Ready));
    }

    #[test]
    fn test_failure_from_each_step() {
        for step in [Fetching, Instantiating, Running] {
            assert!(step.can_transition_to(Failed), "{step} should fail");
        }
        assert!(!NotStarted.can_transition_to(Failed));
    }

    #[test]
    fn test_terminal_states_stick() {
        let cell = LoadingStateCell::new();
        cell.transition(Fetching).unwrap();
        assert!(cell.fail(Error::fetch("x", "down")));
        assert!(!cell.fail(Error::execution("late")));

        let err = cell.transition(Ready).unwrap_err();
        assert_eq!(err.code(), "invalid_transition");
        assert_eq!(cell.get(), Failed);
        assert_eq!(cell.failure().map(Error::code), Some("fetch_error"));
    }

    #[test]
    fn test_ready_is_not_overwritten_by_failure() {
        let cell = LoadingStateCell::new();
        for next in [Fetching, Instantiating, Running, Ready] {
            cell.transition(next).unwrap();
        }
        assert!(!cell.fail(Error::execution("crashed after ready")));
        assert_eq!(cell.get(), Ready);
        assert!(cell.failure().is_none());
    }

    #[test]
    fn test_skipping_steps_rejected() {
        let cell = LoadingStateCell::new();
        assert!(cell.transition(Running).is_err());
        assert_eq!(cell.get(), NotStarted);
    }

    #[tokio::test]
    async fn test_settled_reports_failure() {
        let cell = LoadingStateCell::new();
        let waiter = {
            let cell = cell.clone();
            tokio::spawn(async move { cell.settled().await })
        };

        cell.transition(Fetching).unwrap();
        cell.transition(Instantiating).unwrap();
        cell.fail(Error::instantiation("bad magic"));

        let err = waiter.await.unwrap().unwrap_err();
        assert_eq!(err.code(), "instantiation_error");
    }

    #[tokio::test]
    async fn test_settled_ready() {
        let cell = LoadingStateCell::new();
        for next in [Fetching, Instantiating, Running, Ready] {
            cell.transition(next).unwrap();
        }
        tokio_test::assert_ok!(cell.settled().await);
    }
}
