//! Scripted authentication pipeline
//!
//! Replays a list of [`Step`]s per run instead of talking to a card and an
//! IDP. Used by the `cardwall-sim` binary and by tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tracing::debug;

use cardwall_core::{AuthenticationState, Credentials, IdpErrorCode, PipelineFault, ProfileId, Tag};

use crate::card_source::TagSource;
use crate::pipeline::{AttemptStream, AuthenticationPipeline};

/// Names accepted by [`ScriptedPipeline::scenario`]
pub const SCENARIOS: &[&str] = &[
    "success",
    "wrong-can",
    "wrong-pin",
    "last-pin",
    "blocked",
    "tag-lost",
    "idp-down",
    "crash",
];

const STEP_DELAY: Duration = Duration::from_millis(150);

/// One step of a scripted run
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Emit(AuthenticationState),
    Delay(Duration),
    /// Wait for the next card from the run's tag source
    AwaitCard,
    /// End the run with a fault
    Fail(PipelineFault),
    /// Never make progress again
    Hang,
}

/// What a run was started with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    pub profile_id: ProfileId,
    pub credentials: &'static str,
    pub presented: Option<Tag>,
}

pub struct ScriptedPipeline {
    scripts: Mutex<VecDeque<Vec<Step>>>,
    fallback: Vec<Step>,
    invocations: AtomicUsize,
    cancellations: Arc<AtomicUsize>,
    runs: Mutex<Vec<RunRecord>>,
}

/// Counts runs dropped before they finished
struct RunGuard {
    cancellations: Arc<AtomicUsize>,
    finished: bool,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if !self.finished {
            self.cancellations.fetch_add(1, Ordering::SeqCst);
        }
    }
}

struct Run {
    steps: VecDeque<Step>,
    cards: TagSource,
    guard: RunGuard,
}

impl ScriptedPipeline {
    /// Pipeline whose unscripted runs complete successfully without waiting for a card
    pub fn new() -> Self {
        Self::with_fallback(Self::successful_flow())
    }

    /// Pipeline replaying `fallback` once the queued scripts are used up
    pub fn with_fallback(fallback: Vec<Step>) -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            fallback,
            invocations: AtomicUsize::new(0),
            cancellations: Arc::new(AtomicUsize::new(0)),
            runs: Mutex::new(Vec::new()),
        }
    }

    /// Named scenario replayed by every run, `None` for unknown names
    pub fn scenario(name: &str) -> Option<Self> {
        let channel = vec![
            Step::Emit(AuthenticationState::FlowInitialized),
            Step::AwaitCard,
            Step::Delay(STEP_DELAY),
            Step::Emit(AuthenticationState::CommunicationChannelReady),
            Step::Delay(STEP_DELAY),
            Step::Emit(AuthenticationState::TrustedChannelEstablished),
        ];
        let card = [
            Step::Delay(STEP_DELAY),
            Step::Emit(AuthenticationState::CertificateLoaded),
        ];
        let signed = [
            Step::Delay(STEP_DELAY),
            Step::Emit(AuthenticationState::CardCommunicationFinished),
        ];

        let steps: Vec<Step> = match name {
            "success" => channel
                .into_iter()
                .chain(card)
                .chain(signed)
                .chain([
                    Step::Delay(STEP_DELAY),
                    Step::Emit(AuthenticationState::IdpCommunicationFinished),
                    Step::Emit(AuthenticationState::FlowFinished),
                ])
                .collect(),
            "wrong-can" => channel[..4]
                .iter()
                .cloned()
                .chain([Step::Fail(PipelineFault::CardAccessDenied)])
                .collect(),
            "wrong-pin" | "last-pin" | "blocked" => {
                let left = match name {
                    "wrong-pin" => 2,
                    "last-pin" => 1,
                    _ => 0,
                };
                channel
                    .into_iter()
                    .chain(card)
                    .chain([Step::Fail(PipelineFault::PinRetriesLeft(left))])
                    .collect()
            }
            "tag-lost" => channel
                .into_iter()
                .chain([Step::Fail(PipelineFault::TagLost(
                    "Tag was lost".to_string(),
                ))])
                .collect(),
            "idp-down" => channel
                .into_iter()
                .chain(card)
                .chain(signed)
                .chain([Step::Fail(PipelineFault::Idp {
                    code: IdpErrorCode::Unknown,
                })])
                .collect(),
            "crash" => channel
                .into_iter()
                .chain([Step::Fail(PipelineFault::Unclassified(
                    "unexpected card response".to_string(),
                ))])
                .collect(),
            _ => return None,
        };
        Some(Self::with_fallback(steps))
    }

    /// Every milestone without waiting for a card
    pub fn successful_flow() -> Vec<Step> {
        [
            AuthenticationState::FlowInitialized,
            AuthenticationState::CommunicationChannelReady,
            AuthenticationState::TrustedChannelEstablished,
            AuthenticationState::CertificateLoaded,
            AuthenticationState::CardCommunicationFinished,
            AuthenticationState::IdpCommunicationFinished,
            AuthenticationState::FlowFinished,
        ]
        .into_iter()
        .map(Step::Emit)
        .collect()
    }

    /// Queue a script for the next run
    pub fn push_script(&self, steps: Vec<Step>) {
        self.scripts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(steps);
    }

    /// Number of runs started
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    /// Number of runs dropped before they finished
    pub fn cancellations(&self) -> usize {
        self.cancellations.load(Ordering::SeqCst)
    }

    pub fn runs(&self) -> Vec<RunRecord> {
        self.runs.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Default for ScriptedPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthenticationPipeline for ScriptedPipeline {
    fn run(
        &self,
        profile_id: &ProfileId,
        credentials: &Credentials,
        cards: TagSource,
    ) -> AttemptStream {
        let steps = self
            .scripts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        let run_number = self.invocations.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Scripted run {} with {} steps", run_number, steps.len());
        self.runs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RunRecord {
                profile_id: profile_id.clone(),
                credentials: credentials.kind(),
                presented: cards.presented_tag().cloned(),
            });

        let run = Run {
            steps: steps.into(),
            cards,
            guard: RunGuard {
                cancellations: Arc::clone(&self.cancellations),
                finished: false,
            },
        };

        stream::unfold(run, |mut run| async move {
            loop {
                let Some(step) = run.steps.pop_front() else {
                    run.guard.finished = true;
                    return None;
                };

                match step {
                    Step::Emit(state) => return Some((Ok(state), run)),
                    Step::Delay(delay) => tokio::time::sleep(delay).await,
                    Step::AwaitCard => match run.cards.first().await {
                        Some(tag) => debug!("Scripted run using card {}", tag),
                        None => {
                            run.guard.finished = true;
                            return None;
                        }
                    },
                    Step::Fail(fault) => {
                        run.steps.clear();
                        run.guard.finished = true;
                        return Some((Err(fault), run));
                    }
                    Step::Hang => futures::future::pending::<()>().await,
                }
            }
        })
        .boxed()
    }
}
