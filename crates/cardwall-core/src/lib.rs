//! Cardwall Core - Shared types for health-card authentication
//!
//! This crate provides the vocabulary shared by the authentication state
//! machine, the card/IDP pipeline and the presentation layer:
//! - The authentication state timeline and its classification table
//! - Card access number, PIN and profile credentials
//! - Contactless card tag handles
//! - The fault taxonomy produced by the authentication pipeline

pub mod credentials;
pub mod error;
pub mod fault;
pub mod state;
pub mod tag;

pub use credentials::{CardAccessNumber, Credentials, Pin, ProfileId};
pub use error::{Error, Result};
pub use fault::{IdpErrorCode, PipelineFault};
pub use state::{
    AuthenticationState, Classification, Phase, Problem, ProgressStage, RetryRoute,
};
pub use tag::Tag;

/// Length of a card access number in digits
pub const CAN_LENGTH: usize = 6;

/// Minimum PIN length in digits
pub const MIN_PIN_LENGTH: usize = 6;

/// Maximum PIN length in digits
pub const MAX_PIN_LENGTH: usize = 8;
