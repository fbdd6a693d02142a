use crate::store::{Alert, AlertSink};
use crate::traffic::SeverityTable;
use crate::types::{Incident, IncidentStatus};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What to do with the incidents already present in the first snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColdStart {
    /// Treat the first snapshot as the baseline; alert on nothing in it.
    #[default]
    Suppress,
    /// Alert on every approved incident in the first snapshot.
    AlertAll,
}

/// Diffs successive public-feed snapshots and raises one alert per newly
/// seen incident.
pub struct ChangeNotifier {
    table: Arc<SeverityTable>,
    sink: Arc<dyn AlertSink>,
    cold_start: ColdStart,
    previous: Option<HashSet<String>>,
    announced: HashSet<String>,
}

impl ChangeNotifier {
    pub fn new(table: Arc<SeverityTable>, sink: Arc<dyn AlertSink>) -> Self {
        Self {
            table,
            sink,
            cold_start: ColdStart::default(),
            previous: None,
            announced: HashSet::new(),
        }
    }

    pub fn with_cold_start(mut self, cold_start: ColdStart) -> Self {
        self.cold_start = cold_start;
        self
    }

    /// Update the bookkeeping for `snapshot` and return the alerts it
    /// warrants. Ids already alerted during this lifetime never alert again.
    pub fn diff(&mut self, snapshot: &[Incident]) -> Vec<Alert> {
        let approved: Vec<&Incident> = snapshot
            .iter()
            .filter(|i| i.status == IncidentStatus::Approved)
            .collect();
        let current: HashSet<String> = approved.iter().map(|i| i.id.clone()).collect();

        let alerts = match (&self.previous, self.cold_start) {
            (None, ColdStart::Suppress) => {
                debug!("Baseline of {} approved incidents, no alerts", current.len());
                self.announced.extend(current.iter().cloned());
                Vec::new()
            }
            (previous, _) => approved
                .iter()
                .filter(|i| previous.as_ref().map_or(true, |p| !p.contains(&i.id)))
                .filter(|i| self.announced.insert(i.id.clone()))
                .map(|i| Alert {
                    incident_id: i.id.clone(),
                    title: i.title.clone(),
                    location: i.location.clone(),
                    severity: self.table.classify_incident(i).severity,
                })
                .collect(),
        };

        self.previous = Some(current);
        alerts
    }

    /// Diff and deliver. Delivery failures are logged and do not undo the
    /// bookkeeping. Returns the number of alerts raised.
    pub fn on_public_update(&mut self, snapshot: &[Incident]) -> usize {
        let alerts = self.diff(snapshot);
        for alert in &alerts {
            match self.sink.emit(alert) {
                Ok(()) => info!("Alert raised for incident {} ({})", alert.incident_id, alert.location),
                Err(e) => warn!("Alert for incident {} not delivered: {}", alert.incident_id, e),
            }
        }
        alerts.len()
    }

    /// Forget everything, as a fresh subscription would.
    pub fn reset(&mut self) {
        self.previous = None;
        self.announced.clear();
    }
}
