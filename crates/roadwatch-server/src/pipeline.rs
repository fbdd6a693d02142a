use crate::alerts::{MarkerBoard, ToastSink};
use crate::metrics;
use roadwatch_core::error::SubscriptionError;
use roadwatch_core::notifier::{ChangeNotifier, ColdStart};
use roadwatch_core::traffic::{SeverityTable, TrafficAggregator};
use roadwatch_core::types::Incident;
use roadwatch_sync::{FeedStatus, LiveViewSynchronizer, Subscription};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// The server's own public-feed subscriber. Every snapshot replaces the
/// cached feed, then drives the traffic aggregator and the change notifier.
pub struct Pipeline {
    feed: Arc<RwLock<Vec<Incident>>>,
    subscription: Subscription,
}

impl Pipeline {
    pub fn start(
        sync: &LiveViewSynchronizer,
        table: Arc<SeverityTable>,
        board: Arc<MarkerBoard>,
        alerts: Arc<ToastSink>,
        cold_start: ColdStart,
    ) -> Self {
        let feed = Arc::new(RwLock::new(Vec::new()));
        let mut aggregator = TrafficAggregator::new(table.clone(), board);
        let mut notifier = ChangeNotifier::new(table, alerts).with_cold_start(cold_start);

        let cache = feed.clone();
        let on_update = move |snapshot: Vec<Incident>| {
            metrics::update_feed_size("public", snapshot.len());
            if let Ok(mut held) = cache.write() {
                *held = snapshot.clone();
            }
            let markers = aggregator.on_public_update(&snapshot).len();
            let raised = notifier.on_public_update(&snapshot);
            debug!(
                "Public feed at {} incidents, {} markers, {} new alerts",
                snapshot.len(),
                markers,
                raised
            );
        };
        let on_error = |err: SubscriptionError| match err {
            SubscriptionError::Disconnected { attempt, .. } => {
                metrics::record_reconnect("public");
                debug!("Public feed reconnect attempt {}", attempt);
            }
            other => warn!("Public feed stopped: {}", other),
        };

        let subscription = sync.subscribe_public(on_update, on_error);
        Self { feed, subscription }
    }

    /// Latest public feed, newest first.
    pub fn public_feed(&self) -> Vec<Incident> {
        self.feed.read().map(|f| f.clone()).unwrap_or_default()
    }

    pub fn status(&self) -> FeedStatus {
        self.subscription.status()
    }

    pub fn stop(&self) {
        self.subscription.unsubscribe();
    }
}
