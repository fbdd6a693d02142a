use crate::types::{Coordinates, Incident, IncidentStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Traffic impact of an approved incident. Derived, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Moderate,
    Severe,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Moderate => "moderate",
            Severity::Severe => "severe",
        }
    }

    pub fn default_color(&self) -> &'static str {
        match self {
            Severity::Low => "#16a34a",
            Severity::Moderate => "#f59e0b",
            Severity::Severe => "#dc2626",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub severity: Severity,
    pub color: String,
}

impl Classification {
    pub fn of(severity: Severity) -> Self {
        Self {
            severity,
            color: severity.default_color().to_string(),
        }
    }
}

/// Classification for one incident type, with optional per-subtype overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeverityRule {
    pub default: Classification,
    pub subtypes: HashMap<String, Classification>,
}

impl SeverityRule {
    pub fn fixed(severity: Severity) -> Self {
        Self {
            default: Classification::of(severity),
            subtypes: HashMap::new(),
        }
    }

    pub fn with_subtype(mut self, subtype: &str, severity: Severity) -> Self {
        self.subtypes
            .insert(subtype.to_string(), Classification::of(severity));
        self
    }
}

/// Lookup table from incident type to traffic classification.
///
/// Types missing from the table resolve to `fallback`, so every geolocated
/// approved incident still gets a marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeverityTable {
    rules: HashMap<String, SeverityRule>,
    fallback: Classification,
}

impl SeverityTable {
    pub fn new(fallback: Severity) -> Self {
        Self {
            rules: HashMap::new(),
            fallback: Classification::of(fallback),
        }
    }

    pub fn with_rule(mut self, incident_type: &str, rule: SeverityRule) -> Self {
        self.rules.insert(incident_type.to_string(), rule);
        self
    }

    pub fn insert(&mut self, incident_type: String, rule: SeverityRule) {
        self.rules.insert(incident_type, rule);
    }

    pub fn classify(&self, incident_type: &str, subtype: Option<&str>) -> &Classification {
        match self.rules.get(incident_type) {
            Some(rule) => subtype
                .and_then(|s| rule.subtypes.get(s))
                .unwrap_or(&rule.default),
            None => &self.fallback,
        }
    }

    pub fn classify_incident(&self, incident: &Incident) -> &Classification {
        self.classify(&incident.incident_type, incident.subtype.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedTrafficMarker {
    pub incident_id: String,
    pub severity: Severity,
    pub color: String,
    pub coordinates: Coordinates,
}

/// One marker per approved incident that carries usable coordinates, in feed
/// order. Incidents without coordinates are skipped, never placed somewhere
/// by default.
pub fn derive_markers(table: &SeverityTable, feed: &[Incident]) -> Vec<DerivedTrafficMarker> {
    feed.iter()
        .filter(|incident| incident.status == IncidentStatus::Approved)
        .filter_map(|incident| {
            let coordinates = incident.coordinates.filter(|c| c.is_valid())?;
            let class = table.classify_incident(incident);
            Some(DerivedTrafficMarker {
                incident_id: incident.id.clone(),
                severity: class.severity,
                color: class.color.clone(),
                coordinates,
            })
        })
        .collect()
}

/// Anything that can draw the current marker set.
pub trait MapSurface: Send + Sync {
    fn render(&self, markers: &[DerivedTrafficMarker]);
}

/// Keeps the marker set in step with the public feed and pushes every
/// recomputation to the map surface.
pub struct TrafficAggregator {
    table: Arc<SeverityTable>,
    surface: Arc<dyn MapSurface>,
    markers: Vec<DerivedTrafficMarker>,
}

impl TrafficAggregator {
    pub fn new(table: Arc<SeverityTable>, surface: Arc<dyn MapSurface>) -> Self {
        Self {
            table,
            surface,
            markers: Vec::new(),
        }
    }

    pub fn on_public_update(&mut self, feed: &[Incident]) -> &[DerivedTrafficMarker] {
        self.markers = derive_markers(&self.table, feed);
        debug!("Recomputed {} traffic markers from {} incidents", self.markers.len(), feed.len());
        self.surface.render(&self.markers);
        &self.markers
    }

    pub fn markers(&self) -> &[DerivedTrafficMarker] {
        &self.markers
    }
}
