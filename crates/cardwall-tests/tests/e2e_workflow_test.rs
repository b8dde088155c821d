//! End-to-end workflow tests for the Cardwall authenticator
//!
//! These tests drive the public API the way the presentation layer does:
//! user start/stop, card taps through discovery, retries from the error
//! dialog, and observe the published states and navigation callbacks.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use rstest::rstest;
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};

use cardwall_auth::{
    AttemptStream, AuthConfig, AuthenticationPipeline, Authenticator, BroadcastDiscovery,
    Collaborators, PresentationHooks, ScriptedPipeline, Snapshot, Step, TagSource, Transition,
};
use cardwall_core::{
    AuthenticationState, Credentials, IdpErrorCode, PipelineFault, ProfileId, RetryRoute, Tag,
};

use AuthenticationState as S;

#[derive(Default)]
struct RecordingHooks {
    events: Mutex<Vec<&'static str>>,
}

impl RecordingHooks {
    fn record(&self, event: &'static str) {
        self.events.lock().unwrap().push(event);
    }

    fn count(&self, event: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| **e == event)
            .count()
    }
}

impl PresentationHooks for RecordingHooks {
    fn on_final(&self) {
        self.record("final");
    }

    fn on_retry_can(&self) {
        self.record("retry_can");
    }

    fn on_retry_pin(&self) {
        self.record("retry_pin");
    }

    fn on_unlock_card(&self) {
        self.record("unlock_card");
    }

    fn on_show_enable_radio_dialog(&self) {
        self.record("enable_radio");
    }
}

struct Harness {
    authenticator: Authenticator,
    discovery: Arc<BroadcastDiscovery>,
    pipeline: Arc<ScriptedPipeline>,
    hooks: Arc<RecordingHooks>,
    transitions: broadcast::Receiver<Transition>,
}

fn test_config() -> AuthConfig {
    AuthConfig {
        fault_debounce_ms: 20,
        discovery_retry_ms: 10,
        transition_buffer: 256,
        ..AuthConfig::default()
    }
}

fn harness(pipeline: ScriptedPipeline) -> Harness {
    harness_with(test_config(), pipeline)
}

fn harness_with(config: AuthConfig, pipeline: ScriptedPipeline) -> Harness {
    let credentials = Credentials::health_card("123123", "123456").unwrap();
    harness_full(config, credentials, pipeline)
}

fn harness_full(config: AuthConfig, credentials: Credentials, pipeline: ScriptedPipeline) -> Harness {
    let discovery = Arc::new(BroadcastDiscovery::new(16));
    let pipeline = Arc::new(pipeline);
    let hooks = Arc::new(RecordingHooks::default());

    let authenticator = spawn_authenticator(
        config,
        credentials,
        pipeline.clone(),
        &discovery,
        hooks.clone(),
    );
    let transitions = authenticator.transitions();

    Harness {
        authenticator,
        discovery,
        pipeline,
        hooks,
        transitions,
    }
}

fn spawn_authenticator(
    config: AuthConfig,
    credentials: Credentials,
    pipeline: Arc<dyn AuthenticationPipeline>,
    discovery: &Arc<BroadcastDiscovery>,
    hooks: Arc<RecordingHooks>,
) -> Authenticator {
    Authenticator::spawn(
        config,
        ProfileId::new("profile-1").unwrap(),
        credentials,
        Collaborators {
            pipeline,
            discovery: discovery.clone(),
            radio: discovery.clone(),
        },
        hooks,
    )
    .unwrap()
}

async fn wait_for(authenticator: &Authenticator, f: impl FnMut(&Snapshot) -> bool) -> Snapshot {
    let mut rx = authenticator.subscribe();
    let snapshot = timeout(Duration::from_secs(5), rx.wait_for(f))
        .await
        .expect("timed out waiting for snapshot")
        .expect("supervisor stopped")
        .clone();
    snapshot
}

impl Harness {
    async fn wait_for(&self, f: impl FnMut(&Snapshot) -> bool) -> Snapshot {
        wait_for(&self.authenticator, f).await
    }

    /// Wait until the discovery watch (and any attempt) is listening
    async fn wait_for_listeners(&self, count: usize) {
        timeout(Duration::from_secs(5), async {
            while self.discovery.listener_count() < count {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("discovery not subscribed");
    }

    fn drain(&mut self) -> Vec<Transition> {
        let mut transitions = Vec::new();
        while let Ok(transition) = self.transitions.try_recv() {
            transitions.push(transition);
        }
        transitions
    }
}

fn states(transitions: &[Transition]) -> Vec<AuthenticationState> {
    transitions.iter().map(|t| t.state.clone()).collect()
}

fn card(id: u8) -> Tag {
    Tag::new(vec![0x04, 0x5A, id], true).unwrap()
}

#[tokio::test]
async fn test_full_sign_on_flow() {
    let mut h = harness(ScriptedPipeline::new());

    h.authenticator.start().unwrap();
    let snapshot = h.wait_for(|s| s.is_final()).await;
    assert_eq!(snapshot.attempt, 1);
    assert!(snapshot.progress_dialog);

    assert_eq!(
        states(&h.drain()),
        vec![
            S::None,
            S::FlowInitialized,
            S::CommunicationChannelReady,
            S::TrustedChannelEstablished,
            S::CertificateLoaded,
            S::CardCommunicationFinished,
            S::IdpCommunicationFinished,
            S::FlowFinished,
        ]
    );
    assert_eq!(h.hooks.count("final"), 1);

    // Stays finished until the next trigger
    sleep(Duration::from_millis(50)).await;
    assert_eq!(h.authenticator.current_state(), S::FlowFinished);
    assert!(!h.authenticator.snapshot().is_ready());

    h.authenticator.stop().unwrap();
    let snapshot = h.wait_for(|s| s.attempt == 2).await;
    assert!(snapshot.is_ready());
    assert!(!snapshot.is_final());
    assert!(!snapshot.progress_dialog);
    assert_eq!(h.hooks.count("final"), 1);
    assert_eq!(h.pipeline.invocations(), 1);
}

#[tokio::test]
async fn test_stop_while_idle_is_noop() {
    let mut h = harness(ScriptedPipeline::new());

    h.authenticator.stop().unwrap();
    let snapshot = h.wait_for(|s| s.attempt == 1).await;
    assert_eq!(snapshot.state, S::None);

    sleep(Duration::from_millis(30)).await;
    assert_eq!(states(&h.drain()), vec![S::None]);
    assert_eq!(h.pipeline.invocations(), 0);
}

#[tokio::test]
async fn test_troubleshooting_after_three_interruptions() {
    let pipeline = ScriptedPipeline::new();
    for _ in 0..3 {
        pipeline.push_script(vec![
            Step::Emit(S::FlowInitialized),
            Step::Emit(S::CommunicationChannelReady),
            Step::Emit(S::CommunicationInterrupted),
        ]);
    }
    let h = harness(pipeline);
    h.authenticator.arm_troubleshooting(true).unwrap();

    for attempt in 1..=3u64 {
        h.authenticator.start().unwrap();
        let snapshot = h
            .wait_for(|s| s.attempt == attempt && s.interruptions == attempt as u32)
            .await;
        assert_eq!(snapshot.state, S::CommunicationInterrupted);
    }

    let snapshot = h.authenticator.snapshot();
    assert_eq!(snapshot.interruptions, 3);
    assert!(snapshot.troubleshooting_enabled);
    assert!(h.authenticator.show_troubleshooting());

    // Re-arming resets the budget
    h.authenticator.arm_troubleshooting(true).unwrap();
    let snapshot = h.wait_for(|s| s.interruptions == 0).await;
    assert!(!snapshot.show_troubleshooting(2));
}

#[tokio::test]
async fn test_troubleshooting_needs_enabling() {
    let pipeline = ScriptedPipeline::with_fallback(vec![
        Step::Emit(S::FlowInitialized),
        Step::Emit(S::CommunicationInterrupted),
    ]);
    let h = harness(pipeline);

    for attempt in 1..=3u64 {
        h.authenticator.start().unwrap();
        h.wait_for(|s| s.attempt == attempt && s.state == S::CommunicationInterrupted)
            .await;
    }
    assert_eq!(h.authenticator.snapshot().interruptions, 3);
    assert!(!h.authenticator.show_troubleshooting());
}

#[tokio::test]
async fn test_cancel_mid_flight() {
    let pipeline = ScriptedPipeline::new();
    pipeline.push_script(vec![
        Step::Emit(S::FlowInitialized),
        Step::Emit(S::CommunicationChannelReady),
        Step::Delay(Duration::from_millis(20)),
        Step::Emit(S::TrustedChannelEstablished),
        Step::Hang,
    ]);
    let mut h = harness(pipeline);

    h.authenticator.start().unwrap();
    let snapshot = h.wait_for(|s| s.state == S::CommunicationChannelReady).await;
    assert!(snapshot.is_in_progress());
    assert!(h.authenticator.cancel_enabled());

    assert!(h.authenticator.cancel().unwrap());
    assert!(!h.authenticator.cancel_enabled());

    let snapshot = h.wait_for(|s| s.attempt == 2).await;
    assert!(snapshot.is_ready());
    assert!(h.authenticator.cancel_enabled());

    sleep(Duration::from_millis(60)).await;
    assert_eq!(h.pipeline.cancellations(), 1);
    assert_eq!(h.authenticator.current_state(), S::None);

    let transitions = h.drain();
    let last = transitions.last().unwrap();
    assert_eq!((last.attempt, &last.state), (2, &S::None));
}

#[tokio::test]
async fn test_new_trigger_supersedes_running_attempt() {
    let pipeline = ScriptedPipeline::new();
    pipeline.push_script(vec![
        Step::Emit(S::FlowInitialized),
        Step::Emit(S::CommunicationChannelReady),
        Step::Delay(Duration::from_millis(10)),
        Step::Emit(S::TrustedChannelEstablished),
        Step::Delay(Duration::from_millis(10)),
        Step::Emit(S::CertificateLoaded),
        Step::Hang,
    ]);
    let mut h = harness(pipeline);

    h.authenticator.start().unwrap();
    h.wait_for(|s| s.state == S::CommunicationChannelReady).await;
    h.authenticator.start().unwrap();
    h.wait_for(|s| s.attempt == 2 && s.is_final()).await;

    let transitions = h.drain();
    let boundary = transitions
        .iter()
        .position(|t| t.attempt == 2)
        .expect("second attempt published");

    // One None opens each attempt
    assert_eq!(transitions[0].state, S::None);
    assert_eq!(transitions[boundary].state, S::None);
    assert_eq!(
        transitions.iter().filter(|t| t.state == S::None).count(),
        2
    );
    assert!(transitions[boundary..].iter().all(|t| t.attempt == 2));
    assert_eq!(transitions[boundary + 1].state, S::FlowInitialized);

    // Timestamps follow publication order
    assert!(transitions.windows(2).all(|w| w[0].at <= w[1].at));
    assert_eq!(h.pipeline.cancellations(), 1);
    assert_eq!(h.hooks.count("final"), 1);
}

#[tokio::test]
async fn test_card_tap_starts_attempt_with_presented_card() {
    let pipeline = ScriptedPipeline::with_fallback(vec![
        Step::Emit(S::FlowInitialized),
        Step::AwaitCard,
        Step::Emit(S::CommunicationChannelReady),
        Step::Emit(S::FlowFinished),
    ]);
    let mut h = harness(pipeline);
    h.wait_for_listeners(1).await;

    h.discovery.present(card(1));
    h.wait_for(|s| s.is_final()).await;

    assert_eq!(
        states(&h.drain()),
        vec![
            S::None,
            S::FlowInitialized,
            S::CommunicationChannelReady,
            S::FlowFinished
        ]
    );
    assert_eq!(h.pipeline.runs()[0].presented, Some(card(1)));
}

#[tokio::test]
async fn test_card_ignored_after_idp_failure() {
    let pipeline = ScriptedPipeline::with_fallback(vec![
        Step::Emit(S::FlowInitialized),
        Step::Fail(PipelineFault::Idp {
            code: IdpErrorCode::Unknown,
        }),
    ]);
    let h = harness(pipeline);
    h.wait_for_listeners(1).await;

    h.authenticator.start().unwrap();
    h.wait_for(|s| s.state == S::IdpCommunicationFailed).await;

    h.discovery.present(card(2));
    h.authenticator.present_tag(card(3)).unwrap();
    sleep(Duration::from_millis(60)).await;

    let snapshot = h.authenticator.snapshot();
    assert_eq!(snapshot.state, S::IdpCommunicationFailed);
    assert_eq!(snapshot.attempt, 1);
    assert_eq!(h.pipeline.invocations(), 1);
}

#[tokio::test]
async fn test_card_tap_resumes_after_interruption() {
    let pipeline = ScriptedPipeline::new();
    pipeline.push_script(vec![
        Step::Emit(S::FlowInitialized),
        Step::Emit(S::CommunicationChannelReady),
        Step::Fail(PipelineFault::TagLost("Tag was lost".to_string())),
    ]);
    let h = harness(pipeline);
    h.wait_for_listeners(1).await;

    h.authenticator.start().unwrap();
    let snapshot = h.wait_for(|s| s.state == S::CommunicationInterrupted).await;
    assert_eq!(snapshot.interruptions, 1);
    assert!(snapshot.progress_dialog);
    assert!(snapshot.error_dialog().is_none());

    h.discovery.present(card(4));
    let snapshot = h.wait_for(|s| s.is_final()).await;
    assert_eq!(snapshot.attempt, 2);

    let runs = h.pipeline.runs();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].presented, None);
    assert_eq!(runs[1].presented, Some(card(4)));
}

#[tokio::test]
async fn test_unclassified_fault_is_debounced() {
    let pipeline = ScriptedPipeline::new();
    pipeline.push_script(vec![
        Step::Emit(S::FlowInitialized),
        Step::Fail(PipelineFault::Unclassified("unexpected response".to_string())),
    ]);
    let config = AuthConfig {
        fault_debounce_ms: 200,
        ..test_config()
    };
    let mut h = harness_with(config, pipeline);

    h.authenticator.start().unwrap();
    h.wait_for(|s| s.state == S::CommunicationInterrupted).await;
    h.authenticator.start().unwrap();
    h.wait_for(|s| s.attempt == 2 && s.is_final()).await;

    let transitions = h.drain();
    let interrupted = transitions
        .iter()
        .find(|t| t.state == S::CommunicationInterrupted)
        .unwrap();
    let restarted = transitions
        .iter()
        .find(|t| t.attempt == 2 && t.state == S::None)
        .unwrap();
    assert!(restarted.at - interrupted.at >= chrono::Duration::milliseconds(150));
}

#[rstest]
#[case(PipelineFault::CardAccessDenied, S::CardAccessNumberWrong, "retry_can")]
#[case(PipelineFault::PinRetriesLeft(2), S::Pin2RetriesLeft, "retry_pin")]
#[case(PipelineFault::PinRetriesLeft(1), S::Pin1RetryLeft, "retry_pin")]
#[case(PipelineFault::PinRetriesLeft(0), S::CardBlocked, "unlock_card")]
#[tokio::test]
async fn test_retry_routes_to_corrective_screen(
    #[case] fault: PipelineFault,
    #[case] expected: AuthenticationState,
    #[case] hook: &str,
) {
    let pipeline = ScriptedPipeline::with_fallback(vec![
        Step::Emit(S::FlowInitialized),
        Step::Fail(fault),
    ]);
    let h = harness(pipeline);

    h.authenticator.start().unwrap();
    let snapshot = h.wait_for(|s| s.state == expected).await;
    assert!(snapshot.is_failure());
    assert!(!snapshot.is_in_progress());
    assert!(snapshot.error_dialog().is_some());

    // One routing per failure
    h.authenticator.retry().unwrap();
    h.authenticator.retry().unwrap();
    sleep(Duration::from_millis(50)).await;

    assert_eq!(h.hooks.count(hook), 1);
    assert_eq!(h.pipeline.invocations(), 1);
}

#[tokio::test]
async fn test_retry_restarts_after_idp_failure() {
    let pipeline = ScriptedPipeline::new();
    pipeline.push_script(vec![
        Step::Emit(S::FlowInitialized),
        Step::Fail(PipelineFault::Idp {
            code: IdpErrorCode::InvalidHealthCardCertificate,
        }),
    ]);
    let h = harness(pipeline);

    h.authenticator.start().unwrap();
    let snapshot = h.wait_for(|s| s.state == S::IdpInvalidCertificate).await;
    assert_eq!(
        snapshot.error_dialog().and_then(|d| d.route),
        Some(RetryRoute::Restart)
    );

    h.authenticator.retry().unwrap();
    let snapshot = h.wait_for(|s| s.is_final()).await;
    assert_eq!(snapshot.attempt, 2);
    assert_eq!(h.pipeline.invocations(), 2);
}

#[tokio::test]
async fn test_retry_with_radio_disabled_asks_for_radio() {
    let pipeline = ScriptedPipeline::new();
    pipeline.push_script(vec![
        Step::Emit(S::FlowInitialized),
        Step::Fail(PipelineFault::Idp {
            code: IdpErrorCode::Unknown,
        }),
    ]);
    let h = harness(pipeline);

    h.authenticator.start().unwrap();
    h.wait_for(|s| s.state == S::IdpCommunicationFailed).await;

    h.discovery.set_radio_enabled(false);
    h.authenticator.retry().unwrap();
    h.wait_for(|s| s.radio_dialog).await;
    assert_eq!(h.hooks.count("enable_radio"), 1);
    assert_eq!(h.pipeline.invocations(), 1);

    // Still routable once the radio is back
    h.discovery.set_radio_enabled(true);
    h.authenticator.dismiss_radio_dialog().unwrap();
    h.wait_for(|s| !s.radio_dialog).await;
    h.authenticator.retry().unwrap();
    h.wait_for(|s| s.attempt == 2 && s.is_final()).await;
}

#[tokio::test]
async fn test_radio_disabled_mid_attempt_keeps_attempt_running() {
    let pipeline = ScriptedPipeline::with_fallback(vec![
        Step::Emit(S::FlowInitialized),
        Step::Hang,
    ]);
    let h = harness(pipeline);
    h.wait_for_listeners(1).await;

    h.authenticator.start().unwrap();
    h.wait_for(|s| s.state == S::FlowInitialized).await;

    h.discovery.set_radio_enabled(false);
    let snapshot = h.wait_for(|s| s.radio_dialog).await;
    assert_eq!(snapshot.state, S::FlowInitialized);
    assert_eq!(snapshot.attempt, 1);

    // Discovery keeps retrying without raising the dialog again
    sleep(Duration::from_millis(60)).await;
    assert_eq!(h.hooks.count("enable_radio"), 1);
    assert_eq!(h.pipeline.cancellations(), 0);

    h.authenticator.dismiss_radio_dialog().unwrap();
    h.wait_for(|s| !s.radio_dialog).await;
}

#[tokio::test]
async fn test_start_with_radio_disabled_raises_dialog() {
    let pipeline = ScriptedPipeline::with_fallback(vec![
        Step::Emit(S::FlowInitialized),
        Step::AwaitCard,
        Step::Emit(S::FlowFinished),
    ]);
    let h = harness(pipeline);
    h.discovery.set_radio_enabled(false);

    h.authenticator.start().unwrap();
    let snapshot = h.wait_for(|s| s.radio_dialog && s.attempt == 1).await;
    assert!(!h.authenticator.radio_enabled());
    assert_eq!(snapshot.attempt, 1);

    sleep(Duration::from_millis(60)).await;
    assert_eq!(h.hooks.count("enable_radio"), 1);
}

#[tokio::test]
async fn test_cancellation_can_be_disallowed() {
    let pipeline = ScriptedPipeline::with_fallback(vec![
        Step::Emit(S::FlowInitialized),
        Step::Hang,
    ]);
    let config = AuthConfig {
        allow_user_cancellation: false,
        ..test_config()
    };
    let h = harness_with(config, pipeline);

    h.authenticator.start().unwrap();
    h.wait_for(|s| s.state == S::FlowInitialized).await;

    assert!(!h.authenticator.cancel_enabled());
    assert!(!h.authenticator.cancel().unwrap());
    sleep(Duration::from_millis(30)).await;
    assert_eq!(h.authenticator.snapshot().attempt, 1);
}

#[tokio::test]
async fn test_spawn_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cardwall.json");
    AuthConfig {
        troubleshooting_enabled: true,
        ..test_config()
    }
    .save(&path)
    .unwrap();

    let config = AuthConfig::load(&path).unwrap();
    let h = harness_with(config, ScriptedPipeline::new());
    assert!(h.authenticator.snapshot().troubleshooting_enabled);
    assert!(h.authenticator.config().troubleshooting_enabled);
}

#[tokio::test]
async fn test_shutdown_cancels_active_attempt() {
    let pipeline = ScriptedPipeline::with_fallback(vec![
        Step::Emit(S::FlowInitialized),
        Step::Hang,
    ]);
    let h = harness(pipeline);

    h.authenticator.start().unwrap();
    h.wait_for(|s| s.state == S::FlowInitialized).await;
    let mut states = h.authenticator.subscribe();

    let bus = h.authenticator.bus();
    let Harness {
        authenticator,
        pipeline,
        ..
    } = h;
    authenticator.shutdown().await;

    assert_eq!(states.borrow_and_update().state, S::None);
    assert_eq!(pipeline.cancellations(), 1);
    assert!(bus.start().is_err());
}

#[rstest]
#[case(PipelineFault::UserNotAuthenticated, S::UserNotAuthenticated)]
#[case(PipelineFault::SecureElement, S::SecureElementCryptographyFailed)]
#[tokio::test]
async fn test_retry_in_fatal_state_does_not_restart(
    #[case] fault: PipelineFault,
    #[case] expected: AuthenticationState,
) {
    let pipeline = ScriptedPipeline::with_fallback(vec![
        Step::Emit(S::FlowInitialized),
        Step::Fail(fault),
    ]);
    let h = harness(pipeline);

    h.authenticator.start().unwrap();
    let snapshot = h.wait_for(|s| s.state == expected).await;
    assert_eq!(snapshot.error_dialog().map(|d| d.route), Some(None));

    h.authenticator.retry().unwrap();
    sleep(Duration::from_millis(50)).await;

    let snapshot = h.authenticator.snapshot();
    assert_eq!(snapshot.state, expected);
    assert_eq!(snapshot.attempt, 1);
    assert_eq!(h.pipeline.invocations(), 1);
}

#[tokio::test]
async fn test_retry_after_interruption_waits_for_card() {
    let pipeline = ScriptedPipeline::with_fallback(vec![
        Step::Emit(S::FlowInitialized),
        Step::Fail(PipelineFault::TagLost("Tag was lost".to_string())),
    ]);
    let h = harness(pipeline);

    h.authenticator.start().unwrap();
    h.wait_for(|s| s.state == S::CommunicationInterrupted).await;

    h.authenticator.retry().unwrap();
    sleep(Duration::from_millis(50)).await;
    assert_eq!(h.authenticator.snapshot().attempt, 1);
    assert_eq!(h.pipeline.invocations(), 1);
}

/// Pipeline that panics while setting up or after its first milestone
struct PanickingPipeline {
    during_run: bool,
}

impl AuthenticationPipeline for PanickingPipeline {
    fn run(&self, _: &ProfileId, _: &Credentials, _: TagSource) -> AttemptStream {
        if self.during_run {
            panic!("card reader unavailable");
        }
        stream::iter([
            Ok::<_, PipelineFault>(S::FlowInitialized),
            Ok(S::CommunicationChannelReady),
        ])
        .map(|item| {
            if matches!(item, Ok(S::CommunicationChannelReady)) {
                panic!("unexpected card response");
            }
            item
        })
        .boxed()
    }
}

#[rstest]
#[case(false)]
#[case(true)]
#[tokio::test]
async fn test_pipeline_panic_becomes_interruption(#[case] during_run: bool) {
    let discovery = Arc::new(BroadcastDiscovery::new(16));
    let hooks = Arc::new(RecordingHooks::default());
    let authenticator = spawn_authenticator(
        test_config(),
        Credentials::health_card("123123", "123456").unwrap(),
        Arc::new(PanickingPipeline { during_run }),
        &discovery,
        hooks,
    );
    let mut transitions = authenticator.transitions();

    authenticator.start().unwrap();
    let snapshot = wait_for(&authenticator, |s| s.state == S::CommunicationInterrupted).await;
    assert_eq!(snapshot.interruptions, 1);
    assert!(!snapshot.is_in_progress());

    // The supervisor survives and accepts the next trigger
    authenticator.stop().unwrap();
    let snapshot = wait_for(&authenticator, |s| s.attempt == 2).await;
    assert!(snapshot.is_ready());

    let mut published = Vec::new();
    while let Ok(transition) = transitions.try_recv() {
        published.push(transition.state);
    }
    assert_eq!(published.first(), Some(&S::None));
    assert!(!published.contains(&S::CommunicationChannelReady));
    assert_eq!(published.last(), Some(&S::None));
}

#[tokio::test]
async fn test_card_tap_supersedes_user_attempt() {
    let pipeline = ScriptedPipeline::new();
    pipeline.push_script(vec![
        Step::Emit(S::FlowInitialized),
        Step::AwaitCard,
        Step::Emit(S::CommunicationChannelReady),
        Step::Hang,
    ]);
    let mut h = harness(pipeline);

    h.authenticator.start().unwrap();
    h.wait_for(|s| s.state == S::FlowInitialized).await;
    // discovery watch plus the running attempt
    h.wait_for_listeners(2).await;

    h.discovery.present(card(5));
    let snapshot = h.wait_for(|s| s.attempt == 2 && s.is_final()).await;
    assert_eq!(snapshot.state, S::FlowFinished);

    let transitions = h.drain();
    let boundary = transitions
        .iter()
        .position(|t| t.attempt == 2)
        .expect("card attempt published");

    assert_eq!(transitions[0].state, S::None);
    assert_eq!(transitions[boundary].state, S::None);
    assert_eq!(transitions.iter().filter(|t| t.state == S::None).count(), 2);
    assert!(transitions[..boundary].iter().all(|t| t.attempt == 1));
    assert!(transitions[boundary..].iter().all(|t| t.attempt == 2));

    let runs = h.pipeline.runs();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].presented, None);
    assert_eq!(runs[1].presented, Some(card(5)));
    assert_eq!(h.pipeline.cancellations(), 1);
}

#[tokio::test]
async fn test_pairing_credentials_reach_pipeline() {
    let credentials = Credentials::secure_element_pairing("123123", "12345678").unwrap();
    let h = harness_full(test_config(), credentials, ScriptedPipeline::new());

    h.authenticator.start().unwrap();
    h.wait_for(|s| s.is_final()).await;

    let runs = h.pipeline.runs();
    assert_eq!(runs[0].credentials, "secure_element_pairing");
    assert_eq!(runs[0].profile_id.as_str(), "profile-1");
}
