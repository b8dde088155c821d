//! Trigger bus feeding the authentication supervisor
//!
//! Every producer (presentation layer, discovery watch, card-source side
//! signals) holds a [`TriggerBus`] clone; the supervisor is the single
//! consumer and handles commands in arrival order.

use tokio::sync::mpsc;

use cardwall_core::Tag;

use crate::error::{AuthError, Result};

/// Request to start or stop an authentication attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptTrigger {
    /// Explicit start (`true`) or stop (`false`) by the user
    UserToggle(bool),
    /// A card was presented to the reader
    HardwareTagPresented(Tag),
}

/// Everything the supervisor consumes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Accepted unconditionally; supersedes the running attempt
    Trigger(AttemptTrigger),
    /// Tag seen by the discovery watch; forwarded only if the current state allows it
    TagDiscovered(Tag),
    /// Discovery reported the contactless radio as switched off
    RadioDisabled,
    /// The enable-radio dialog was closed
    DismissRadioDialog,
    /// Reset the interruption budget and set whether troubleshooting is offered
    ArmTroubleshooting(bool),
    /// "Retry" pressed on the error dialog
    Retry,
}

/// Multi-producer entry point of the supervisor
#[derive(Debug, Clone)]
pub struct TriggerBus {
    sender: mpsc::UnboundedSender<Command>,
}

impl TriggerBus {
    /// Create a bus and the receiver for its single consumer
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Command>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    pub fn send(&self, command: Command) -> Result<()> {
        self.sender.send(command).map_err(|_| AuthError::Stopped)
    }

    pub fn trigger(&self, trigger: AttemptTrigger) -> Result<()> {
        self.send(Command::Trigger(trigger))
    }

    pub fn start(&self) -> Result<()> {
        self.trigger(AttemptTrigger::UserToggle(true))
    }

    pub fn stop(&self) -> Result<()> {
        self.trigger(AttemptTrigger::UserToggle(false))
    }

    /// Whether the consumer has gone away
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
