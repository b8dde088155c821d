//! Authentication states and their classification
//!
//! Every state the authentication timeline can be in is listed in
//! [`AuthenticationState`]. What a state *means* to the rest of the system
//! (is it in progress, is it a failure, which corrective screen does it lead
//! to) is decided in exactly one place: [`AuthenticationState::classify`].

use std::fmt;

use serde::{Deserialize, Serialize};

/// One point in the authentication timeline
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AuthenticationState {
    /// No attempt active
    #[default]
    None,

    /// Pipeline started, waiting for a card
    FlowInitialized,
    /// A card channel was opened
    CommunicationChannelReady,
    /// PACE secure channel established with the CAN
    TrustedChannelEstablished,
    /// Card certificate read
    CertificateLoaded,
    /// PIN verified and challenge signed
    CardCommunicationFinished,
    /// IDP exchanged the signed challenge for a token
    IdpCommunicationFinished,
    /// Last milestone before the pipeline reports completion
    FlowFinished,

    /// The card access number was rejected by the card
    CardAccessNumberWrong,
    /// Wrong PIN, two retries left
    Pin2RetriesLeft,
    /// Wrong PIN, one retry left
    Pin1RetryLeft,
    /// PIN retry counter exhausted
    CardBlocked,
    /// Card was lost mid-exchange (or the pipeline failed unexpectedly)
    CommunicationInterrupted,
    /// IDP unreachable or rejected the request
    IdpCommunicationFailed,
    /// IDP rejected the card certificate
    IdpInvalidCertificate,
    /// IDP rejected the OCSP response of the card certificate
    IdpInvalidOcspOfCardCertificate,
    /// The card's insurance identifier is already bound to a profile
    InsuranceIdentifierAlreadyExists {
        insurance_identifier: String,
        in_active_profile: bool,
        profile_name: String,
    },

    /// Key generation or signing in the secure element failed
    SecureElementCryptographyFailed,
    /// Device user authentication (biometrics) was not given
    UserNotAuthenticated,
}

/// Coarse position of a state in the timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    InProgress,
    /// `FlowFinished`: done with card and IDP, completion not yet reported
    Finished,
    Recoverable,
    Fatal,
}

/// Where the error dialog sends the user on "retry"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryRoute {
    EnterCan,
    EnterPin,
    UnlockCard,
    /// Start a fresh attempt with the stored credentials
    Restart,
}

/// Animation shown by the progress dialog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStage {
    SearchingCard,
    ReadingCard,
    CardLost,
}

/// Problem category reported for failure states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Problem {
    CardBlocked,
    CardAccessNumberWrong,
    CardCommunicationInterrupted,
    CardPinWrong,
    IdpCommunicationFailed,
    IdpInvalidCertificate,
    IdpInvalidOcspOfCard,
    InsuranceIdentifierAlreadyExists,
    SecureElementCryptographyFailed,
    UserNotAuthenticated,
}

/// Everything the system derives from a state, computed in one place
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub phase: Phase,
    /// Corrective route for failures that have an error dialog
    pub retry_route: Option<RetryRoute>,
    /// Progress dialog animation, if the state is shown in it
    pub progress_stage: Option<ProgressStage>,
    pub problem: Option<Problem>,
    pub pin_retries_left: Option<u8>,
}

impl Classification {
    fn new(phase: Phase) -> Self {
        Self {
            phase,
            retry_route: None,
            progress_stage: None,
            problem: None,
            pin_retries_left: None,
        }
    }

    fn stage(mut self, stage: ProgressStage) -> Self {
        self.progress_stage = Some(stage);
        self
    }

    fn route(mut self, route: RetryRoute) -> Self {
        self.retry_route = Some(route);
        self
    }

    fn problem(mut self, problem: Problem) -> Self {
        self.problem = Some(problem);
        self
    }

    fn pin_retries(mut self, left: u8) -> Self {
        self.pin_retries_left = Some(left);
        self
    }
}

impl AuthenticationState {
    /// The single classification table
    pub fn classify(&self) -> Classification {
        use AuthenticationState::*;
        use Phase::*;

        match self {
            None => Classification::new(Idle),

            FlowInitialized => {
                Classification::new(InProgress).stage(ProgressStage::SearchingCard)
            }
            CommunicationChannelReady
            | TrustedChannelEstablished
            | CertificateLoaded
            | CardCommunicationFinished
            | IdpCommunicationFinished => {
                Classification::new(InProgress).stage(ProgressStage::ReadingCard)
            }
            FlowFinished => Classification::new(Finished).stage(ProgressStage::ReadingCard),

            CardAccessNumberWrong => Classification::new(Recoverable)
                .route(RetryRoute::EnterCan)
                .problem(Problem::CardAccessNumberWrong),
            Pin2RetriesLeft => Classification::new(Recoverable)
                .route(RetryRoute::EnterPin)
                .problem(Problem::CardPinWrong)
                .pin_retries(2),
            Pin1RetryLeft => Classification::new(Recoverable)
                .route(RetryRoute::EnterPin)
                .problem(Problem::CardPinWrong)
                .pin_retries(1),
            CardBlocked => Classification::new(Recoverable)
                .route(RetryRoute::UnlockCard)
                .problem(Problem::CardBlocked),
            CommunicationInterrupted => Classification::new(Recoverable)
                .stage(ProgressStage::CardLost)
                .problem(Problem::CardCommunicationInterrupted),
            IdpCommunicationFailed => Classification::new(Recoverable)
                .route(RetryRoute::Restart)
                .problem(Problem::IdpCommunicationFailed),
            IdpInvalidCertificate => Classification::new(Recoverable)
                .route(RetryRoute::Restart)
                .problem(Problem::IdpInvalidCertificate),
            IdpInvalidOcspOfCardCertificate => Classification::new(Recoverable)
                .route(RetryRoute::Restart)
                .problem(Problem::IdpInvalidOcspOfCard),
            InsuranceIdentifierAlreadyExists { .. } => Classification::new(Recoverable)
                .route(RetryRoute::Restart)
                .problem(Problem::InsuranceIdentifierAlreadyExists),

            SecureElementCryptographyFailed => {
                Classification::new(Fatal).problem(Problem::SecureElementCryptographyFailed)
            }
            UserNotAuthenticated => {
                Classification::new(Fatal).problem(Problem::UserNotAuthenticated)
            }
        }
    }

    pub fn phase(&self) -> Phase {
        self.classify().phase
    }

    pub fn is_in_progress(&self) -> bool {
        self.phase() == Phase::InProgress
    }

    pub fn is_ready(&self) -> bool {
        self.phase() == Phase::Idle
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.phase(), Phase::Recoverable | Phase::Fatal)
    }

    pub fn is_fatal(&self) -> bool {
        self.phase() == Phase::Fatal
    }

    pub fn requires_can_retry(&self) -> bool {
        self.classify().retry_route == Some(RetryRoute::EnterCan)
    }

    pub fn requires_pin_retry(&self) -> bool {
        self.classify().retry_route == Some(RetryRoute::EnterPin)
    }

    pub fn requires_unlock(&self) -> bool {
        self.classify().retry_route == Some(RetryRoute::UnlockCard)
    }

    /// Whether a newly presented card may start an attempt from this state.
    ///
    /// Failures block re-taps, except a lost card which is resumed by
    /// presenting it again.
    pub fn forwards_tags(&self) -> bool {
        !self.is_failure() || *self == AuthenticationState::CommunicationInterrupted
    }

    /// Stable snake_case name, used in logs
    pub fn name(&self) -> &'static str {
        use AuthenticationState::*;

        match self {
            None => "none",
            FlowInitialized => "flow_initialized",
            CommunicationChannelReady => "communication_channel_ready",
            TrustedChannelEstablished => "trusted_channel_established",
            CertificateLoaded => "certificate_loaded",
            CardCommunicationFinished => "card_communication_finished",
            IdpCommunicationFinished => "idp_communication_finished",
            FlowFinished => "flow_finished",
            CardAccessNumberWrong => "card_access_number_wrong",
            Pin2RetriesLeft => "pin_2_retries_left",
            Pin1RetryLeft => "pin_1_retry_left",
            CardBlocked => "card_blocked",
            CommunicationInterrupted => "communication_interrupted",
            IdpCommunicationFailed => "idp_communication_failed",
            IdpInvalidCertificate => "idp_invalid_certificate",
            IdpInvalidOcspOfCardCertificate => "idp_invalid_ocsp_of_card_certificate",
            InsuranceIdentifierAlreadyExists { .. } => "insurance_identifier_already_exists",
            SecureElementCryptographyFailed => "secure_element_cryptography_failed",
            UserNotAuthenticated => "user_not_authenticated",
        }
    }
}

impl fmt::Display for AuthenticationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
