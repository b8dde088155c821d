//! Error types for the authentication layer

use thiserror::Error;

/// Result type alias for authentication layer operations
pub type Result<T> = std::result::Result<T, AuthError>;

/// Errors surfaced to callers of the authenticator.
///
/// Authentication failures are never errors here: they are published as
/// states. These cover the plumbing around the state machine.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Core library error
    #[error("Core error: {0}")]
    Core(#[from] cardwall_core::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The supervisor task is gone
    #[error("Authenticator has stopped")]
    Stopped,
}

impl From<serde_json::Error> for AuthError {
    fn from(e: serde_json::Error) -> Self {
        AuthError::Serialization(e.to_string())
    }
}
