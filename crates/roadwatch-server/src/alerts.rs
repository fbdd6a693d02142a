use crate::metrics;
use chrono::{DateTime, Utc};
use roadwatch_core::store::{Alert, AlertSink};
use roadwatch_core::traffic::{DerivedTrafficMarker, MapSurface};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Mutex, RwLock};
use tokio::sync::broadcast;

const ALERT_LOG_CAPACITY: usize = 200;
const TOAST_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Serialize)]
pub struct AlertLogEntry {
    pub timestamp: DateTime<Utc>,
    pub alert: Alert,
}

/// Toast delivery: live listeners get each alert over a broadcast channel,
/// and the most recent ones are kept for late joiners.
pub struct ToastSink {
    tx: broadcast::Sender<Alert>,
    log: Mutex<VecDeque<AlertLogEntry>>,
}

impl ToastSink {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(TOAST_CHANNEL_CAPACITY);
        Self {
            tx,
            log: Mutex::new(VecDeque::with_capacity(ALERT_LOG_CAPACITY)),
        }
    }

    pub fn listen(&self) -> broadcast::Receiver<Alert> {
        self.tx.subscribe()
    }

    /// Most recent first.
    pub fn recent(&self) -> Vec<AlertLogEntry> {
        match self.log.lock() {
            Ok(log) => log.iter().rev().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }
}

impl Default for ToastSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AlertSink for ToastSink {
    fn emit(&self, alert: &Alert) -> anyhow::Result<()> {
        {
            let mut log = self
                .log
                .lock()
                .map_err(|_| anyhow::anyhow!("alert log poisoned"))?;
            log.push_back(AlertLogEntry {
                timestamp: Utc::now(),
                alert: alert.clone(),
            });
            while log.len() > ALERT_LOG_CAPACITY {
                log.pop_front();
            }
        }
        metrics::record_alert(alert.severity.as_str());
        // nobody listening is fine, the log still has it
        let _ = self.tx.send(alert.clone());
        Ok(())
    }
}

/// The map surface exposed over HTTP: holds whatever was rendered last.
#[derive(Default)]
pub struct MarkerBoard {
    markers: RwLock<Vec<DerivedTrafficMarker>>,
}

impl MarkerBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Vec<DerivedTrafficMarker> {
        self.markers.read().map(|m| m.clone()).unwrap_or_default()
    }
}

impl MapSurface for MarkerBoard {
    fn render(&self, markers: &[DerivedTrafficMarker]) {
        if let Ok(mut current) = self.markers.write() {
            *current = markers.to_vec();
        }
        metrics::update_marker_count(markers.len());
    }
}
