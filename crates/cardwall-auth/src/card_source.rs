//! Card channel source handed to the authentication pipeline

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future;
use futures::stream::{self, StreamExt};

use cardwall_core::Tag;

use crate::discovery::{LiveDiscovery, TagStream};

/// Where a pipeline run gets its cards from.
///
/// A source can be opened several times (a pipeline reopens it when it has to
/// reconnect). A source created for a presented card yields that card on the
/// first open only; every later open listens to live discovery.
#[derive(Clone)]
pub struct TagSource {
    live: LiveDiscovery,
    presented: Option<Tag>,
    consumed: Arc<AtomicBool>,
}

impl TagSource {
    /// Wait for cards from live discovery
    pub fn live(live: LiveDiscovery) -> Self {
        Self {
            live,
            presented: None,
            consumed: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Start from a card that is already in range
    pub fn presented(tag: Tag, live: LiveDiscovery) -> Self {
        Self {
            live,
            presented: Some(tag),
            consumed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn open(&self) -> TagStream {
        if let Some(tag) = &self.presented {
            if !self.consumed.swap(true, Ordering::SeqCst) {
                return stream::once(future::ready(tag.clone())).boxed();
            }
        }
        self.live.tags()
    }

    /// Next card from a fresh open
    pub async fn first(&self) -> Option<Tag> {
        self.open().next().await
    }

    /// Card the source was created with, if any
    pub fn presented_tag(&self) -> Option<&Tag> {
        self.presented.as_ref()
    }
}
