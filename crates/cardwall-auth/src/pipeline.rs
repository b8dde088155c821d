//! Contract with the card/IDP authentication pipeline

use futures::stream::BoxStream;

use cardwall_core::{AuthenticationState, Credentials, PipelineFault, ProfileId};

use crate::card_source::TagSource;

/// Ordered progress of one pipeline run.
///
/// Dropping the stream cancels the run; implementations must release the
/// card channel and any network request when that happens.
pub type AttemptStream =
    BoxStream<'static, std::result::Result<AuthenticationState, PipelineFault>>;

/// The multi-step card and IDP handshake minting a sign-on token.
///
/// A run reports milestones from `FlowInitialized` to `FlowFinished` and
/// completes by ending the stream. Recognised failures are yielded either as
/// failure states or as classified [`PipelineFault`]s; a fault ends the run.
pub trait AuthenticationPipeline: Send + Sync {
    fn run(
        &self,
        profile_id: &ProfileId,
        credentials: &Credentials,
        cards: TagSource,
    ) -> AttemptStream;
}
