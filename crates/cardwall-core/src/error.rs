//! Error types for the cardwall core library

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Card access number must be exactly {expected} digits, got {actual} characters")]
    CanLength { expected: usize, actual: usize },

    #[error("PIN must be between {min} and {max} digits, got {actual}")]
    PinLength { min: usize, max: usize, actual: usize },

    #[error("{0} must contain digits only")]
    NotNumeric(&'static str),

    #[error("Profile id must not be empty")]
    EmptyProfileId,

    #[error("Tag id must not be empty")]
    EmptyTagId,

    #[error("Invalid tag id: {0}")]
    InvalidTagId(String),
}
