use crate::alerts::{MarkerBoard, ToastSink};
use crate::auth::StaticAuthorizer;
use crate::config::ServerConfig;
use crate::media::DiskMediaStore;
use crate::pipeline::Pipeline;
use anyhow::Context;
use metrics_exporter_prometheus::PrometheusHandle;
use roadwatch_core::catalog::IncidentTypeCatalog;
use roadwatch_core::clock::{Clock, SystemClock};
use roadwatch_core::moderation::ModerationService;
use roadwatch_core::store::{Authorizer, IncidentStore};
use roadwatch_core::submission::SubmissionService;
use roadwatch_sync::{FeedStatus, LiveViewSynchronizer};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// Room left in a request body for the incident fields around the photo.
const BODY_HEADROOM: usize = 64 * 1024;

/// Largest request body that can carry a photo of `max_photo_bytes` encoded
/// as base64.
pub fn body_limit(max_photo_bytes: usize) -> usize {
    max_photo_bytes
        .div_ceil(3)
        .saturating_mul(4)
        .saturating_add(BODY_HEADROOM)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: &'static str,
    pub uptime_seconds: u64,
    pub public_feed: FeedStatus,
    pub public_incidents: usize,
    pub markers: usize,
    pub alerts_logged: usize,
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn IncidentStore>,
    pub authorizer: Arc<dyn Authorizer>,
    pub catalog: Arc<IncidentTypeCatalog>,
    pub submission: Arc<SubmissionService>,
    pub moderation: Arc<ModerationService>,
    pub media: Arc<DiskMediaStore>,
    pub pipeline: Arc<Pipeline>,
    pub markers: Arc<MarkerBoard>,
    pub alerts: Arc<ToastSink>,
    pub prometheus: Option<PrometheusHandle>,
    pub max_body_bytes: usize,
    pub start_time: Instant,
}

impl AppState {
    /// Wire the services around `store` and start the public-feed pipeline.
    /// Must be called inside a Tokio runtime.
    pub fn build(
        config: &ServerConfig,
        store: Arc<dyn IncidentStore>,
        prometheus: Option<PrometheusHandle>,
    ) -> anyhow::Result<Self> {
        let catalog = Arc::new(config.catalog.clone());
        let table = Arc::new(catalog.severity_table());
        let authorizer: Arc<dyn Authorizer> =
            Arc::new(StaticAuthorizer::new(config.admins.iter().cloned()));
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let media = Arc::new(
            DiskMediaStore::new(config.media_dir.clone(), config.max_photo_bytes)
                .with_context(|| format!("Failed to prepare media directory {:?}", config.media_dir))?,
        );
        let submission = Arc::new(
            SubmissionService::new(store.clone(), media.clone(), catalog.clone(), clock.clone())
                .with_media_timeout(config.media_timeout),
        );
        let moderation = Arc::new(ModerationService::new(
            store.clone(),
            authorizer.clone(),
            clock,
        ));

        let sync = LiveViewSynchronizer::new(store.clone(), authorizer.clone())
            .with_reconnect_policy(config.reconnect);
        let markers = Arc::new(MarkerBoard::new());
        let alerts = Arc::new(ToastSink::new());
        let pipeline = Arc::new(Pipeline::start(
            &sync,
            table,
            markers.clone(),
            alerts.clone(),
            config.cold_start,
        ));

        Ok(Self {
            store,
            authorizer,
            catalog,
            submission,
            moderation,
            media,
            pipeline,
            markers,
            alerts,
            prometheus,
            max_body_bytes: body_limit(config.max_photo_bytes),
            start_time: Instant::now(),
        })
    }

    pub fn health(&self) -> HealthReport {
        let public_feed = self.pipeline.status();
        HealthReport {
            status: if public_feed == FeedStatus::Live {
                "ok"
            } else {
                "degraded"
            },
            uptime_seconds: self.start_time.elapsed().as_secs(),
            public_feed,
            public_incidents: self.pipeline.public_feed().len(),
            markers: self.markers.current().len(),
            alerts_logged: self.alerts.recent().len(),
        }
    }
}
