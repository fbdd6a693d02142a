use crate::subscription::{FeedStatus, ReconnectPolicy, Subscription};
use roadwatch_core::error::{StoreError, SubscriptionError};
use roadwatch_core::feed::{ChangeEvent, FeedIndex, FeedKind};
use roadwatch_core::store::{Authorizer, ChangeStream, IncidentStore};
use roadwatch_core::types::{Caller, Incident};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Keeps the public and moderation feeds current from the store's live
/// queries.
///
/// Every `on_update` call carries the whole collection, newest first.
/// Consumers replace what they hold; nothing is a patch. Each feed runs as
/// its own task, so a failure on one never stalls the other. Must be used
/// inside a Tokio runtime.
pub struct LiveViewSynchronizer {
    store: Arc<dyn IncidentStore>,
    authorizer: Arc<dyn Authorizer>,
    policy: ReconnectPolicy,
}

impl LiveViewSynchronizer {
    pub fn new(store: Arc<dyn IncidentStore>, authorizer: Arc<dyn Authorizer>) -> Self {
        Self {
            store,
            authorizer,
            policy: ReconnectPolicy::default(),
        }
    }

    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn subscribe_public<U, E>(&self, on_update: U, on_error: E) -> Subscription
    where
        U: FnMut(Vec<Incident>) + Send + 'static,
        E: FnMut(SubscriptionError) + Send + 'static,
    {
        self.spawn(FeedKind::Public, on_update, on_error)
    }

    /// Pending incidents, for privileged callers only. For anyone else the
    /// live query is never opened, so no pending record reaches them.
    pub fn subscribe_moderation<U, E>(&self, caller: &Caller, on_update: U, on_error: E) -> Subscription
    where
        U: FnMut(Vec<Incident>) + Send + 'static,
        E: FnMut(SubscriptionError) + Send + 'static,
    {
        if !self.authorizer.is_privileged(caller) {
            debug!("Moderation feed not established for {:?}", caller.user_id());
            return Subscription::inert(FeedKind::Moderation);
        }
        self.spawn(FeedKind::Moderation, on_update, on_error)
    }

    fn spawn<U, E>(&self, feed: FeedKind, on_update: U, on_error: E) -> Subscription
    where
        U: FnMut(Vec<Incident>) + Send + 'static,
        E: FnMut(SubscriptionError) + Send + 'static,
    {
        let cancelled = Arc::new(AtomicBool::new(false));
        let (status_tx, status_rx) = watch::channel(FeedStatus::Connecting);

        let runner = FeedRunner {
            store: self.store.clone(),
            feed,
            policy: self.policy,
            cancelled: cancelled.clone(),
            status: status_tx,
            on_update,
            on_error,
        };
        let handle = tokio::spawn(runner.run());

        Subscription::running(feed, cancelled, handle.abort_handle(), status_rx)
    }
}

enum Interruption {
    Denied(String),
    Lost(String),
}

impl From<StoreError> for Interruption {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::PermissionDenied(reason) => Interruption::Denied(reason),
            other => Interruption::Lost(other.to_string()),
        }
    }
}

struct FeedRunner<U, E> {
    store: Arc<dyn IncidentStore>,
    feed: FeedKind,
    policy: ReconnectPolicy,
    cancelled: Arc<AtomicBool>,
    status: watch::Sender<FeedStatus>,
    on_update: U,
    on_error: E,
}

impl<U, E> FeedRunner<U, E>
where
    U: FnMut(Vec<Incident>) + Send + 'static,
    E: FnMut(SubscriptionError) + Send + 'static,
{
    fn cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn deliver(&mut self, snapshot: Vec<Incident>) {
        if !self.cancelled() {
            (self.on_update)(snapshot);
        }
    }

    fn report(&mut self, err: SubscriptionError) {
        if !self.cancelled() {
            (self.on_error)(err);
        }
    }

    async fn run(mut self) {
        let name = self.feed.as_str();
        let mut delay = self.policy.initial;
        let mut attempt = 0u32;

        loop {
            if self.cancelled() {
                return;
            }

            let interruption = match self.store.subscribe(&self.feed.query()).await {
                Ok(stream) => {
                    let (interruption, went_live) = self.pump(stream).await;
                    if went_live {
                        attempt = 0;
                        delay = self.policy.initial;
                    }
                    interruption
                }
                Err(e) => Interruption::from(e),
            };

            match interruption {
                Interruption::Denied(reason) => {
                    error!("{} feed denied: {}", name, reason);
                    let _ = self.status.send(FeedStatus::Failed {
                        reason: reason.clone(),
                    });
                    self.report(SubscriptionError::PermissionDenied(reason));
                    return;
                }
                Interruption::Lost(reason) => {
                    attempt += 1;
                    let _ = self.status.send(FeedStatus::Reconnecting { attempt });
                    warn!(
                        "{} feed lost ({}), reconnecting in {:?} (attempt {})",
                        name, reason, delay, attempt
                    );
                    self.report(SubscriptionError::Disconnected { reason, attempt });
                }
            }

            sleep(delay).await;
            delay = self.policy.next(delay);
        }
    }

    /// Drive one connection until it breaks. The index is fresh for every
    /// connection, so the first snapshot after a reconnect is taken as is.
    async fn pump(&mut self, mut stream: ChangeStream) -> (Interruption, bool) {
        let mut index = FeedIndex::new(self.feed.query());
        let mut live = false;

        loop {
            let event = match stream.recv().await {
                Some(ChangeEvent::Error(e)) => return (Interruption::from(e), live),
                Some(event) => event,
                None => return (Interruption::Lost("change stream closed".to_string()), live),
            };

            let is_snapshot = matches!(event, ChangeEvent::Snapshot(_));
            let changed = index.apply(event);

            if is_snapshot && !live {
                live = true;
                let _ = self.status.send(FeedStatus::Live);
                info!("{} feed live with {} incidents", self.feed.as_str(), index.len());
            }
            if changed {
                self.deliver(index.snapshot());
            }
        }
    }
}
