//! Card discovery and contactless radio status
//!
//! The hardware side is consumed through [`CardDiscovery`] and
//! [`RadioStatus`]. [`LiveDiscovery`] wraps a source into a stream that never
//! ends: failures restart it after a delay, and a disabled radio is reported
//! to the supervisor as a side signal instead of an error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future;
use futures::stream::{self, BoxStream, StreamExt};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{debug, info, warn};

use cardwall_core::Tag;

use crate::trigger::{Command, TriggerBus};

/// Stream of tags that never fails
pub type TagStream = BoxStream<'static, Tag>;

/// Raw stream produced by a discovery source
pub type DiscoveryStream = BoxStream<'static, std::result::Result<Tag, DiscoveryError>>;

/// Errors raised by a discovery source
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiscoveryError {
    /// The contactless radio is switched off
    #[error("Contactless radio is disabled")]
    RadioDisabled,

    #[error("Card reader error: {0}")]
    Hardware(String),
}

/// Source of "card presented" events from the contactless hardware.
///
/// Every call to [`CardDiscovery::tags`] starts a fresh subscription.
pub trait CardDiscovery: Send + Sync {
    fn tags(&self) -> DiscoveryStream;
}

/// Synchronous check of the contactless radio
pub trait RadioStatus: Send + Sync {
    fn is_enabled(&self) -> bool;
}

/// Restartable discovery shared by the watch task and user-started attempts
#[derive(Clone)]
pub struct LiveDiscovery {
    source: Arc<dyn CardDiscovery>,
    radio: Arc<dyn RadioStatus>,
    retry_delay: Duration,
    bus: TriggerBus,
}

struct Resubscribe {
    live: LiveDiscovery,
    current: Option<DiscoveryStream>,
    radio_reported: bool,
}

impl LiveDiscovery {
    pub fn new(
        source: Arc<dyn CardDiscovery>,
        radio: Arc<dyn RadioStatus>,
        retry_delay: Duration,
        bus: TriggerBus,
    ) -> Self {
        Self {
            source,
            radio,
            retry_delay,
            bus,
        }
    }

    /// Tags from the source, resubscribing after errors or when it ends.
    ///
    /// A disabled radio sends one [`Command::RadioDisabled`] per disabled
    /// period; the flag is re-armed once the radio reports enabled again.
    pub fn tags(&self) -> TagStream {
        let state = Resubscribe {
            live: self.clone(),
            current: None,
            radio_reported: false,
        };

        stream::unfold(state, |mut state| async move {
            loop {
                let source = &state.live.source;
                let current = state.current.get_or_insert_with(|| source.tags());

                match current.next().await {
                    Some(Ok(tag)) => {
                        state.radio_reported = false;
                        return Some((tag, state));
                    }
                    Some(Err(DiscoveryError::RadioDisabled)) => {
                        if !state.radio_reported {
                            state.radio_reported = true;
                            warn!("Contactless radio disabled");
                            let _ = state.live.bus.send(Command::RadioDisabled);
                        }
                    }
                    Some(Err(e)) => warn!("Card discovery failed: {}", e),
                    None => debug!("Card discovery ended, resubscribing"),
                }

                state.current = None;
                tokio::time::sleep(state.live.retry_delay).await;

                if state.radio_reported && state.live.radio.is_enabled() {
                    debug!("Contactless radio enabled again");
                    state.radio_reported = false;
                }
            }
        })
        .boxed()
    }

    /// Forward every discovered tag to the supervisor until it goes away
    pub fn spawn_watch(&self) -> JoinHandle<()> {
        let mut tags = self.tags();
        let bus = self.bus.clone();

        tokio::spawn(async move {
            info!("Starting card discovery watch");
            while let Some(tag) = tags.next().await {
                debug!("Card presented: {}", tag);
                if bus.send(Command::TagDiscovered(tag)).is_err() {
                    break;
                }
            }
            debug!("Card discovery watch stopped");
        })
    }
}

/// In-process discovery fed by the platform's reader callbacks
pub struct BroadcastDiscovery {
    events: broadcast::Sender<std::result::Result<Tag, DiscoveryError>>,
    radio_enabled: AtomicBool,
}

impl BroadcastDiscovery {
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            events,
            radio_enabled: AtomicBool::new(true),
        }
    }

    /// Report a card in range. Returns the number of listeners reached.
    pub fn present(&self, tag: Tag) -> usize {
        if !self.radio_enabled.load(Ordering::SeqCst) {
            debug!("Ignoring card {} while radio is disabled", tag);
            return 0;
        }
        self.events.send(Ok(tag)).unwrap_or(0)
    }

    /// Switch the radio; disabling notifies current listeners
    pub fn set_radio_enabled(&self, enabled: bool) {
        let was_enabled = self.radio_enabled.swap(enabled, Ordering::SeqCst);
        if was_enabled && !enabled {
            let _ = self.events.send(Err(DiscoveryError::RadioDisabled));
        }
    }

    /// Report a reader failure to current listeners
    pub fn report_failure(&self, reason: impl Into<String>) {
        let _ = self.events.send(Err(DiscoveryError::Hardware(reason.into())));
    }

    /// Number of active subscriptions
    pub fn listener_count(&self) -> usize {
        self.events.receiver_count()
    }
}

impl Default for BroadcastDiscovery {
    fn default() -> Self {
        Self::new(16)
    }
}

impl CardDiscovery for BroadcastDiscovery {
    fn tags(&self) -> DiscoveryStream {
        if !self.radio_enabled.load(Ordering::SeqCst) {
            return stream::once(future::ready(Err(DiscoveryError::RadioDisabled))).boxed();
        }

        BroadcastStream::new(self.events.subscribe())
            .filter_map(|event| {
                future::ready(match event {
                    Ok(event) => Some(event),
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        warn!("Card discovery lagged, skipped {} events", skipped);
                        None
                    }
                })
            })
            .boxed()
    }
}

impl RadioStatus for BroadcastDiscovery {
    fn is_enabled(&self) -> bool {
        self.radio_enabled.load(Ordering::SeqCst)
    }
}
