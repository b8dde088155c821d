//! What the presentation layer observes
//!
//! The supervisor publishes a [`Snapshot`] on every change (latest value
//! wins) and a [`Transition`] for every published state (ordered log).
//! One-shot navigation events go through [`PresentationHooks`].

use chrono::{DateTime, Utc};
use serde::Serialize;

use cardwall_core::{AuthenticationState, Phase, Problem, RetryRoute};

/// Latest view of the authenticator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub state: AuthenticationState,
    /// Number of accepted triggers so far; 0 before the first one
    pub attempt: u64,
    /// The pipeline completed after `FlowFinished`
    pub flow_completed: bool,
    /// Interruptions counted since troubleshooting was last armed
    pub interruptions: u32,
    pub troubleshooting_enabled: bool,
    /// Opened by in-progress states, closed by `None`
    pub progress_dialog: bool,
    /// Enable-radio dialog is showing
    pub radio_dialog: bool,
}

impl Snapshot {
    /// The pipeline reported overall completion
    pub fn is_final(&self) -> bool {
        self.flow_completed && self.state == AuthenticationState::FlowFinished
    }

    pub fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    pub fn is_in_progress(&self) -> bool {
        self.state.is_in_progress()
    }

    pub fn is_failure(&self) -> bool {
        self.state.is_failure()
    }

    pub fn show_troubleshooting(&self, threshold: u32) -> bool {
        self.troubleshooting_enabled && self.interruptions > threshold && !self.is_in_progress()
    }

    /// Error dialog for the current state.
    ///
    /// A lost card has no dialog: the progress dialog keeps listening for
    /// the card to be presented again.
    pub fn error_dialog(&self) -> Option<ErrorDialog> {
        let classification = self.state.classify();
        let problem = classification.problem?;

        match (classification.phase, classification.retry_route) {
            (Phase::Recoverable, Some(route)) => Some(ErrorDialog {
                route: Some(route),
                problem,
                pin_retries_left: classification.pin_retries_left,
            }),
            (Phase::Fatal, _) => Some(ErrorDialog {
                route: None,
                problem,
                pin_retries_left: None,
            }),
            _ => None,
        }
    }
}

/// Error dialog contents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ErrorDialog {
    /// Where "retry" leads; `None` only offers cancel
    pub route: Option<RetryRoute>,
    pub problem: Problem,
    pub pin_retries_left: Option<u8>,
}

/// One published state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub attempt: u64,
    pub state: AuthenticationState,
    pub at: DateTime<Utc>,
}

impl Transition {
    pub fn new(attempt: u64, state: AuthenticationState) -> Self {
        Self {
            attempt,
            state,
            at: Utc::now(),
        }
    }
}

/// Navigation callbacks, invoked from the supervisor task.
///
/// Each terminal event triggers at most one call. Implementations must not
/// block.
pub trait PresentationHooks: Send + Sync {
    fn on_state_change(&self, _state: &AuthenticationState) {}

    /// Sign-on completed
    fn on_final(&self) {}

    fn on_retry_can(&self) {}

    fn on_retry_pin(&self) {}

    fn on_unlock_card(&self) {}

    fn on_show_enable_radio_dialog(&self) {}
}

/// Hooks that ignore everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl PresentationHooks for NoopHooks {}
