use roadwatch_core::feed::FeedKind;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::debug;

const INITIAL_RECONNECT_DELAY: Duration = Duration::from_secs(1);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(300);

/// Exponential backoff between reconnect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl ReconnectPolicy {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
        }
    }

    pub fn next(&self, current: Duration) -> Duration {
        (current * 2).min(self.max)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(INITIAL_RECONNECT_DELAY, MAX_RECONNECT_DELAY)
    }
}

/// Connection state of one feed, for the "reconnecting" indicator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FeedStatus {
    Connecting,
    Live,
    Reconnecting { attempt: u32 },
    Failed { reason: String },
    /// Never established (caller not privileged) or unsubscribed.
    Inactive,
}

/// Handle to a running feed. Dropping it unsubscribes.
pub struct Subscription {
    feed: FeedKind,
    cancelled: Arc<AtomicBool>,
    task: Option<AbortHandle>,
    status: watch::Receiver<FeedStatus>,
}

impl Subscription {
    pub(crate) fn running(
        feed: FeedKind,
        cancelled: Arc<AtomicBool>,
        task: AbortHandle,
        status: watch::Receiver<FeedStatus>,
    ) -> Self {
        Self {
            feed,
            cancelled,
            task: Some(task),
            status,
        }
    }

    /// A subscription that never delivers anything.
    pub(crate) fn inert(feed: FeedKind) -> Self {
        let (_tx, status) = watch::channel(FeedStatus::Inactive);
        Self {
            feed,
            cancelled: Arc::new(AtomicBool::new(true)),
            task: None,
            status,
        }
    }

    /// Stop all future callbacks. Safe to call repeatedly, and after the
    /// underlying connection has already failed.
    pub fn unsubscribe(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = &self.task {
            task.abort();
        }
        debug!("Unsubscribed from {} feed", self.feed.as_str());
    }

    pub fn is_active(&self) -> bool {
        !self.cancelled.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> FeedStatus {
        if !self.is_active() {
            return FeedStatus::Inactive;
        }
        self.status.borrow().clone()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
