use crate::traffic::{Severity, SeverityRule, SeverityTable};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// One reportable incident type. Color and icon are presentation only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentTypeDef {
    pub key: String,
    pub label: String,
    pub color: String,
    pub icon: String,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub subtypes: BTreeMap<String, Severity>,
}

/// The closed set of incident types accepted at submission time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentTypeCatalog {
    pub types: Vec<IncidentTypeDef>,
    /// Severity for records whose type has since left the catalog.
    #[serde(default = "default_fallback")]
    pub fallback: Severity,
}

fn default_fallback() -> Severity {
    Severity::Moderate
}

impl IncidentTypeCatalog {
    pub fn new(types: Vec<IncidentTypeDef>) -> anyhow::Result<Self> {
        let catalog = Self {
            types,
            fallback: default_fallback(),
        };
        catalog.check()?;
        Ok(catalog)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read incident types from {}", path.display()))?;
        let catalog: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid incident type catalog {}", path.display()))?;
        catalog.check()?;
        Ok(catalog)
    }

    fn check(&self) -> anyhow::Result<()> {
        if self.types.is_empty() {
            anyhow::bail!("Incident type catalog is empty");
        }
        let mut seen = HashSet::new();
        for def in &self.types {
            if def.key.trim().is_empty() {
                anyhow::bail!("Incident type with empty key");
            }
            if !seen.insert(def.key.as_str()) {
                anyhow::bail!("Duplicate incident type '{}'", def.key);
            }
        }
        Ok(())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn get(&self, key: &str) -> Option<&IncidentTypeDef> {
        self.types.iter().find(|def| def.key == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.types.iter().map(|def| def.key.as_str())
    }

    pub fn severity_table(&self) -> SeverityTable {
        let mut table = SeverityTable::new(self.fallback);
        for def in &self.types {
            let rule = def
                .subtypes
                .iter()
                .fold(SeverityRule::fixed(def.severity), |rule, (sub, sev)| {
                    rule.with_subtype(sub, *sev)
                });
            table.insert(def.key.clone(), rule);
        }
        table
    }

    pub fn builtin() -> Self {
        let def = |key: &str, label: &str, color: &str, icon: &str, severity| IncidentTypeDef {
            key: key.to_string(),
            label: label.to_string(),
            color: color.to_string(),
            icon: icon.to_string(),
            severity,
            subtypes: BTreeMap::new(),
        };

        let mut congestion = def("congestion", "Congestion", "#f97316", "traffic-light", Severity::Moderate);
        congestion.subtypes.insert("light".to_string(), Severity::Low);
        congestion.subtypes.insert("heavy".to_string(), Severity::Severe);
        congestion.subtypes.insert("standstill".to_string(), Severity::Severe);

        Self {
            types: vec![
                def("roadwork", "Roadwork", "#eab308", "hard-hat", Severity::Moderate),
                def("accident", "Accident", "#dc2626", "car-crash", Severity::Severe),
                congestion,
                def("road_closure", "Road closed", "#7c3aed", "road-barrier", Severity::Severe),
                def("flooding", "Flooding", "#2563eb", "water", Severity::Severe),
                def("other", "Other", "#6b7280", "info", Severity::Low),
            ],
            fallback: default_fallback(),
        }
    }
}

impl Default for IncidentTypeCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_builtin_catalog_table() {
        let catalog = IncidentTypeCatalog::builtin();
        assert!(catalog.contains("accident"));
        assert!(!catalog.contains("meteor"));

        let table = catalog.severity_table();
        assert_eq!(table.classify("accident", None).severity, Severity::Severe);
        assert_eq!(table.classify("roadwork", None).severity, Severity::Moderate);
        assert_eq!(table.classify("congestion", Some("heavy")).severity, Severity::Severe);
    }

    #[test]
    fn test_load_catalog_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r##"{{"types": [
                {{"key": "pothole", "label": "Pothole", "color": "#000", "icon": "hole", "severity": "low"}}
            ], "fallback": "severe"}}"##
        )
        .unwrap();

        let catalog = IncidentTypeCatalog::load(file.path()).unwrap();
        assert_eq!(catalog.keys().collect::<Vec<_>>(), vec!["pothole"]);
        let table = catalog.severity_table();
        assert_eq!(table.classify("pothole", None).severity, Severity::Low);
        assert_eq!(table.classify("accident", None).severity, Severity::Severe);
    }

    #[test]
    fn test_duplicate_keys_rejected() {
        let mut types = IncidentTypeCatalog::builtin().types;
        types.push(types[0].clone());
        assert!(IncidentTypeCatalog::new(types).is_err());
    }
}
