//! Cardwall Auth - Health-card authentication state machine
//!
//! This crate provides:
//! - The trigger bus merging user start/stop and card taps ("latest wins")
//! - The supervisor owning the current attempt, state and error budget
//! - Card discovery adaptation with radio-disabled side signalling
//! - The contract with the card/IDP authentication pipeline
//! - A scripted pipeline for simulation and tests

pub mod card_source;
pub mod config;
pub mod discovery;
pub mod error;
pub mod machine;
pub mod pipeline;
pub mod signals;
pub mod sim;
pub mod trigger;

pub use card_source::TagSource;
pub use config::AuthConfig;
pub use discovery::{
    BroadcastDiscovery, CardDiscovery, DiscoveryError, DiscoveryStream, LiveDiscovery, RadioStatus,
    TagStream,
};
pub use error::{AuthError, Result};
pub use machine::{Authenticator, Collaborators};
pub use pipeline::{AttemptStream, AuthenticationPipeline};
pub use signals::{ErrorDialog, NoopHooks, PresentationHooks, Snapshot, Transition};
pub use sim::{RunRecord, ScriptedPipeline, Step, SCENARIOS};
pub use trigger::{AttemptTrigger, Command, TriggerBus};
