use metrics::{counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the global Prometheus recorder. The handle renders the scrape
/// body for `GET /metrics`.
pub fn init_metrics() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    Ok(handle)
}

pub fn record_submission(incident_type: &str, anonymous: bool) {
    counter!(
        "incidents_submitted_total",
        "type" => incident_type.to_string(),
        "anonymous" => anonymous.to_string()
    )
    .increment(1);
}

pub fn record_submission_rejected(reason: &str) {
    counter!("incidents_submission_failed_total", "reason" => reason.to_string()).increment(1);
}

pub fn record_media_failure(kind: &str) {
    counter!("media_upload_failures_total", "kind" => kind.to_string()).increment(1);
}

pub fn record_transition(target: &str, outcome: &str) {
    counter!(
        "moderation_transitions_total",
        "target" => target.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

pub fn record_alert(severity: &str) {
    counter!("alerts_total", "severity" => severity.to_string()).increment(1);
}

pub fn record_reconnect(feed: &str) {
    counter!("feed_reconnects_total", "feed" => feed.to_string()).increment(1);
}

pub fn update_feed_size(feed: &str, len: usize) {
    gauge!("feed_incidents", "feed" => feed.to_string()).set(len as f64);
}

pub fn update_marker_count(len: usize) {
    gauge!("traffic_markers").set(len as f64);
}
