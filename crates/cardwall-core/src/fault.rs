//! Faults raised by the authentication pipeline
//!
//! A pipeline reports recognised protocol failures as [`PipelineFault`]
//! values; [`PipelineFault::classify`] turns them into the state the user
//! sees. Anything the pipeline cannot attribute ends up as
//! [`PipelineFault::Unclassified`] and is left to the state machine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state::AuthenticationState;

/// Error codes the IDP returns in the `gematik_code` field of an error body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdpErrorCode {
    InvalidHealthCardCertificate,
    InvalidOcspResponseOfHealthCardCertificate,
    Unknown,
}

impl IdpErrorCode {
    pub fn from_code(code: &str) -> Self {
        match code.trim() {
            "2020" => Self::InvalidHealthCardCertificate,
            "2021" => Self::InvalidOcspResponseOfHealthCardCertificate,
            _ => Self::Unknown,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidHealthCardCertificate => "2020",
            Self::InvalidOcspResponseOfHealthCardCertificate => "2021",
            Self::Unknown => "-",
        }
    }
}

/// Failure of one pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineFault {
    /// PACE failed: the card rejected the card access number
    #[error("Card rejected the card access number")]
    CardAccessDenied,

    /// PIN verification failed with the given retry counter
    #[error("Wrong PIN, {0} retries left")]
    PinRetriesLeft(u8),

    #[error("Card is blocked")]
    CardBlocked,

    /// Tag lost or card I/O failed
    #[error("Card communication interrupted: {0}")]
    TagLost(String),

    #[error("IDP communication failed (code {})", .code.code())]
    Idp { code: IdpErrorCode },

    #[error("Insurance identifier {insurance_identifier} already assigned to profile {profile_name}")]
    InsuranceIdentifierAssigned {
        insurance_identifier: String,
        in_active_profile: bool,
        profile_name: String,
    },

    #[error("Secure element failure")]
    SecureElement,

    #[error("User not authenticated")]
    UserNotAuthenticated,

    /// Anything the pipeline could not attribute
    #[error("Unclassified pipeline fault: {0}")]
    Unclassified(String),
}

impl PipelineFault {
    /// State this fault is reported as, or `None` when it cannot be attributed
    pub fn classify(&self) -> Option<AuthenticationState> {
        let state = match self {
            Self::CardAccessDenied => AuthenticationState::CardAccessNumberWrong,
            Self::PinRetriesLeft(2) => AuthenticationState::Pin2RetriesLeft,
            Self::PinRetriesLeft(1) => AuthenticationState::Pin1RetryLeft,
            Self::PinRetriesLeft(0) | Self::CardBlocked => AuthenticationState::CardBlocked,
            Self::PinRetriesLeft(_) => return None,
            Self::TagLost(_) => AuthenticationState::CommunicationInterrupted,
            Self::Idp { code } => match code {
                IdpErrorCode::InvalidHealthCardCertificate => {
                    AuthenticationState::IdpInvalidCertificate
                }
                IdpErrorCode::InvalidOcspResponseOfHealthCardCertificate => {
                    AuthenticationState::IdpInvalidOcspOfCardCertificate
                }
                IdpErrorCode::Unknown => AuthenticationState::IdpCommunicationFailed,
            },
            Self::InsuranceIdentifierAssigned {
                insurance_identifier,
                in_active_profile,
                profile_name,
            } => AuthenticationState::InsuranceIdentifierAlreadyExists {
                insurance_identifier: insurance_identifier.clone(),
                in_active_profile: *in_active_profile,
                profile_name: profile_name.clone(),
            },
            Self::SecureElement => AuthenticationState::SecureElementCryptographyFailed,
            Self::UserNotAuthenticated => AuthenticationState::UserNotAuthenticated,
            Self::Unclassified(_) => return None,
        };
        Some(state)
    }
}
