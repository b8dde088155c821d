//! Authentication state machine
//!
//! A single supervisor task owns the current state, the interruption budget
//! and the one active attempt. Everything reaches it as a [`Command`] over the
//! trigger bus, or as an attempt message from the attempt task it spawned.
//! A new trigger aborts and joins the running attempt before `None` is
//! published, so no state of a superseded attempt is ever observed after it.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::{FutureExt, StreamExt};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use cardwall_core::{AuthenticationState, Credentials, PipelineFault, ProfileId, RetryRoute, Tag};

use crate::card_source::TagSource;
use crate::config::AuthConfig;
use crate::discovery::{CardDiscovery, LiveDiscovery, RadioStatus};
use crate::error::Result;
use crate::pipeline::AuthenticationPipeline;
use crate::signals::{PresentationHooks, Snapshot, Transition};
use crate::trigger::{AttemptTrigger, Command, TriggerBus};

/// External services the authenticator drives
#[derive(Clone)]
pub struct Collaborators {
    pub pipeline: Arc<dyn AuthenticationPipeline>,
    pub discovery: Arc<dyn CardDiscovery>,
    pub radio: Arc<dyn RadioStatus>,
}

/// Interruptions counted towards the troubleshooting offer
#[derive(Debug, Clone, Copy, Default)]
struct ErrorBudget {
    interruptions: u32,
    enabled: bool,
}

impl ErrorBudget {
    fn arm(&mut self, enabled: bool) {
        self.interruptions = 0;
        self.enabled = enabled;
    }

    fn record(&mut self) {
        self.interruptions = self.interruptions.saturating_add(1);
    }
}

struct AttemptSession {
    attempt: u64,
    origin: &'static str,
    task: JoinHandle<()>,
    started: Instant,
}

#[derive(Debug)]
enum AttemptEvent {
    State(AuthenticationState),
    Fault(PipelineFault),
    Completed,
}

#[derive(Debug)]
struct AttemptMessage {
    attempt: u64,
    event: AttemptEvent,
}

struct Supervisor {
    config: AuthConfig,
    profile_id: ProfileId,
    credentials: Credentials,
    pipeline: Arc<dyn AuthenticationPipeline>,
    radio: Arc<dyn RadioStatus>,
    live: LiveDiscovery,
    hooks: Arc<dyn PresentationHooks>,

    snapshots: watch::Sender<Snapshot>,
    transitions: broadcast::Sender<Transition>,
    cancel_enabled: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<AttemptMessage>,

    state: AuthenticationState,
    attempts: u64,
    session: Option<AttemptSession>,
    budget: ErrorBudget,
    flow_completed: bool,
    progress_dialog: bool,
    radio_dialog: bool,
    /// Attempt whose failure was already routed by a retry
    routed: Option<u64>,
}

impl Supervisor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<AttemptMessage>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        info!("Authentication supervisor started for profile {}", self.profile_id);

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => break,
                Some(command) = commands.recv() => self.handle_command(command, &mut events).await,
                Some(message) = events.recv() => self.handle_event(message).await,
                else => break,
            }
        }

        if self.cancel_active().await || self.state != AuthenticationState::None {
            self.publish(AuthenticationState::None);
        }
        info!("Authentication supervisor stopped");
    }

    async fn handle_command(
        &mut self,
        command: Command,
        events: &mut mpsc::UnboundedReceiver<AttemptMessage>,
    ) {
        match command {
            Command::Trigger(trigger) => self.accept(trigger).await,
            Command::TagDiscovered(tag) => {
                self.catch_up(events).await;
                if self.state.forwards_tags() {
                    self.accept(AttemptTrigger::HardwareTagPresented(tag)).await;
                } else {
                    debug!("Ignoring card {} in state {}", tag, self.state);
                }
            }
            Command::RadioDisabled => self.raise_radio_dialog(),
            Command::DismissRadioDialog => {
                self.radio_dialog = false;
                self.refresh();
            }
            Command::ArmTroubleshooting(enabled) => {
                debug!("Troubleshooting armed (enabled: {})", enabled);
                self.budget.arm(enabled);
                self.refresh();
            }
            Command::Retry => {
                self.catch_up(events).await;
                self.retry().await;
            }
        }
    }

    /// Apply attempt messages that are already queued, so commands gated on
    /// the current state see the latest one
    async fn catch_up(&mut self, events: &mut mpsc::UnboundedReceiver<AttemptMessage>) {
        while let Ok(message) = events.try_recv() {
            self.handle_event(message).await;
        }
    }

    async fn accept(&mut self, trigger: AttemptTrigger) {
        self.cancel_active().await;

        self.cancel_enabled.store(true, Ordering::SeqCst);
        self.attempts += 1;
        self.flow_completed = false;
        self.publish(AuthenticationState::None);

        match trigger {
            AttemptTrigger::UserToggle(true) => {
                info!("Attempt {} started by user", self.attempts);
                if !self.radio.is_enabled() {
                    self.raise_radio_dialog();
                }
                self.launch(TagSource::live(self.live.clone()), "user");
            }
            AttemptTrigger::UserToggle(false) => {
                info!("Authentication stopped");
            }
            AttemptTrigger::HardwareTagPresented(tag) => {
                info!("Attempt {} started by card {}", self.attempts, tag);
                self.launch(TagSource::presented(tag, self.live.clone()), "card");
            }
        }
    }

    fn launch(&mut self, cards: TagSource, origin: &'static str) {
        let attempt = self.attempts;
        let started = panic::catch_unwind(AssertUnwindSafe(|| {
            self.pipeline.run(&self.profile_id, &self.credentials, cards)
        }));
        let events = self.events.clone();

        let task = tokio::spawn(async move {
            let mut states = match started {
                Ok(states) => states,
                Err(payload) => {
                    let _ = events.send(AttemptMessage {
                        attempt,
                        event: AttemptEvent::Fault(pipeline_panic(payload)),
                    });
                    return;
                }
            };

            loop {
                let item = match AssertUnwindSafe(states.next()).catch_unwind().await {
                    Ok(Some(item)) => item,
                    Ok(None) => break,
                    Err(payload) => Err(pipeline_panic(payload)),
                };
                let (event, last) = match item {
                    Ok(state) => (AttemptEvent::State(state), false),
                    Err(fault) => (AttemptEvent::Fault(fault), true),
                };
                if events.send(AttemptMessage { attempt, event }).is_err() || last {
                    return;
                }
            }
            let _ = events.send(AttemptMessage {
                attempt,
                event: AttemptEvent::Completed,
            });
        });

        self.session = Some(AttemptSession {
            attempt,
            origin,
            task,
            started: Instant::now(),
        });
    }

    /// Abort the running attempt and wait until its pipeline stream is dropped
    async fn cancel_active(&mut self) -> bool {
        let Some(session) = self.session.take() else {
            return false;
        };

        session.task.abort();
        match session.task.await {
            Err(e) if e.is_panic() => warn!("Attempt {} panicked", session.attempt),
            _ => {}
        }
        info!(
            "Cancelled attempt {} ({}) after {:?}",
            session.attempt,
            session.origin,
            session.started.elapsed()
        );
        true
    }

    async fn handle_event(&mut self, message: AttemptMessage) {
        let current = self.session.as_ref().map(|s| s.attempt);
        if current != Some(message.attempt) {
            debug!("Discarding {:?} from stale attempt {}", message.event, message.attempt);
            return;
        }

        match message.event {
            AttemptEvent::State(state) => self.publish(state),
            AttemptEvent::Fault(fault) => {
                self.session = None;
                match fault.classify() {
                    Some(state) => {
                        warn!("Attempt {} failed: {}", message.attempt, fault);
                        self.publish(state);
                    }
                    None => {
                        warn!("Attempt {} failed unexpectedly: {}", message.attempt, fault);
                        self.publish(AuthenticationState::CommunicationInterrupted);
                        tokio::time::sleep(self.config.fault_debounce()).await;
                    }
                }
            }
            AttemptEvent::Completed => {
                if let Some(session) = self.session.take() {
                    debug!(
                        "Attempt {} completed after {:?}",
                        session.attempt,
                        session.started.elapsed()
                    );
                }
                if self.state == AuthenticationState::FlowFinished {
                    info!("Attempt {} finished", message.attempt);
                    self.flow_completed = true;
                    self.refresh();
                    self.hooks.on_final();
                } else {
                    debug!("Attempt {} ended in state {}", message.attempt, self.state);
                }
            }
        }
    }

    async fn retry(&mut self) {
        if !self.state.is_failure() {
            debug!("Retry ignored in state {}", self.state);
            return;
        }
        if self.routed == Some(self.attempts) {
            debug!("Retry for attempt {} already routed", self.attempts);
            return;
        }

        match self.state.classify().retry_route {
            Some(RetryRoute::EnterCan) => {
                self.routed = Some(self.attempts);
                self.hooks.on_retry_can();
            }
            Some(RetryRoute::EnterPin) => {
                self.routed = Some(self.attempts);
                self.hooks.on_retry_pin();
            }
            Some(RetryRoute::UnlockCard) => {
                self.routed = Some(self.attempts);
                self.hooks.on_unlock_card();
            }
            Some(RetryRoute::Restart) => {
                if self.radio.is_enabled() {
                    self.routed = Some(self.attempts);
                    self.accept(AttemptTrigger::UserToggle(true)).await;
                } else {
                    self.raise_radio_dialog();
                }
            }
            // fatal failures only offer cancel; a lost card waits for a re-tap
            None => debug!("No retry route from state {}", self.state),
        }
    }

    fn raise_radio_dialog(&mut self) {
        if self.radio_dialog {
            return;
        }
        warn!("Contactless radio disabled, asking user to enable it");
        self.radio_dialog = true;
        self.refresh();
        self.hooks.on_show_enable_radio_dialog();
    }

    fn publish(&mut self, state: AuthenticationState) {
        match state.classify().problem {
            Some(problem) => warn!("Attempt {}: {} ({:?})", self.attempts, state, problem),
            None => debug!("Attempt {}: {}", self.attempts, state),
        }

        if state == AuthenticationState::CommunicationInterrupted {
            self.budget.record();
        }
        if state.is_in_progress() {
            self.progress_dialog = true;
        } else if state == AuthenticationState::None {
            self.progress_dialog = false;
        }

        self.state = state.clone();
        let _ = self.transitions.send(Transition::new(self.attempts, state));
        self.refresh();
        self.hooks.on_state_change(&self.state);
    }

    fn refresh(&self) {
        self.snapshots.send_replace(Snapshot {
            state: self.state.clone(),
            attempt: self.attempts,
            flow_completed: self.flow_completed,
            interruptions: self.budget.interruptions,
            troubleshooting_enabled: self.budget.enabled,
            progress_dialog: self.progress_dialog,
            radio_dialog: self.radio_dialog,
        });
    }
}

/// Turn a panic inside the pipeline into an unclassified fault
fn pipeline_panic(payload: Box<dyn Any + Send>) -> PipelineFault {
    let reason = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    PipelineFault::Unclassified(format!("pipeline panicked: {}", reason))
}

/// Handle to a running authentication state machine.
///
/// Dropping the handle stops the supervisor and the discovery watch; use
/// [`Authenticator::shutdown`] to wait for the active attempt to be cancelled.
pub struct Authenticator {
    config: AuthConfig,
    bus: TriggerBus,
    radio: Arc<dyn RadioStatus>,
    snapshots: watch::Receiver<Snapshot>,
    transitions: broadcast::Sender<Transition>,
    cancel_enabled: Arc<AtomicBool>,
    shutdown: Option<oneshot::Sender<()>>,
    supervisor: Option<JoinHandle<()>>,
    watch: JoinHandle<()>,
}

impl Authenticator {
    /// Start the supervisor and the discovery watch. Must be called within a
    /// tokio runtime.
    pub fn spawn(
        config: AuthConfig,
        profile_id: ProfileId,
        credentials: Credentials,
        collaborators: Collaborators,
        hooks: Arc<dyn PresentationHooks>,
    ) -> Result<Self> {
        config.validate()?;

        let (bus, commands) = TriggerBus::new();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (transitions, _) = broadcast::channel(config.transition_buffer);
        let cancel_enabled = Arc::new(AtomicBool::new(true));

        let budget = ErrorBudget {
            interruptions: 0,
            enabled: config.troubleshooting_enabled,
        };
        let (snapshots_tx, snapshots) = watch::channel(Snapshot {
            troubleshooting_enabled: budget.enabled,
            ..Snapshot::default()
        });

        let live = LiveDiscovery::new(
            collaborators.discovery,
            Arc::clone(&collaborators.radio),
            config.discovery_retry(),
            bus.clone(),
        );
        let watch = live.spawn_watch();

        let supervisor = Supervisor {
            config: config.clone(),
            profile_id,
            credentials,
            pipeline: collaborators.pipeline,
            radio: Arc::clone(&collaborators.radio),
            live,
            hooks,
            snapshots: snapshots_tx,
            transitions: transitions.clone(),
            cancel_enabled: Arc::clone(&cancel_enabled),
            events: events_tx,
            state: AuthenticationState::None,
            attempts: 0,
            session: None,
            budget,
            flow_completed: false,
            progress_dialog: false,
            radio_dialog: false,
            routed: None,
        };
        let supervisor = tokio::spawn(supervisor.run(commands, events_rx, shutdown_rx));

        Ok(Self {
            config,
            bus,
            radio: collaborators.radio,
            snapshots,
            transitions,
            cancel_enabled,
            shutdown: Some(shutdown_tx),
            supervisor: Some(supervisor),
            watch,
        })
    }

    /// Start an attempt with live card discovery
    pub fn start(&self) -> Result<()> {
        self.bus.start()
    }

    pub fn stop(&self) -> Result<()> {
        self.bus.stop()
    }

    /// Stop the running attempt on behalf of the user.
    ///
    /// Returns false when cancellation is not allowed or was already
    /// requested for the current attempt.
    pub fn cancel(&self) -> Result<bool> {
        if !self.config.allow_user_cancellation {
            return Ok(false);
        }
        if self
            .cancel_enabled
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(false);
        }
        self.bus.stop()?;
        Ok(true)
    }

    /// Route the error dialog's retry button
    pub fn retry(&self) -> Result<()> {
        self.bus.send(Command::Retry)
    }

    /// Report a card presented by the platform; subject to tag gating
    pub fn present_tag(&self, tag: Tag) -> Result<()> {
        self.bus.send(Command::TagDiscovered(tag))
    }

    pub fn arm_troubleshooting(&self, enabled: bool) -> Result<()> {
        self.bus.send(Command::ArmTroubleshooting(enabled))
    }

    pub fn dismiss_radio_dialog(&self) -> Result<()> {
        self.bus.send(Command::DismissRadioDialog)
    }

    pub fn current_state(&self) -> AuthenticationState {
        self.snapshots.borrow().state.clone()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshots.borrow().clone()
    }

    /// Latest snapshot, replayed to new subscribers
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshots.clone()
    }

    /// Every published state in order, from the moment of subscription
    pub fn transitions(&self) -> broadcast::Receiver<Transition> {
        self.transitions.subscribe()
    }

    pub fn cancel_enabled(&self) -> bool {
        self.config.allow_user_cancellation && self.cancel_enabled.load(Ordering::SeqCst)
    }

    pub fn show_troubleshooting(&self) -> bool {
        self.snapshot()
            .show_troubleshooting(self.config.troubleshooting_threshold)
    }

    pub fn radio_enabled(&self) -> bool {
        self.radio.is_enabled()
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Producer handle for platform glue
    pub fn bus(&self) -> TriggerBus {
        self.bus.clone()
    }

    /// Cancel the active attempt, publish `None` and stop all tasks
    pub async fn shutdown(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(supervisor) = self.supervisor.take() {
            let _ = supervisor.await;
        }
        self.watch.abort();
    }
}

impl Drop for Authenticator {
    fn drop(&mut self) {
        self.watch.abort();
    }
}
