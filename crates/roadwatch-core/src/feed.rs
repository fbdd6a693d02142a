use crate::error::StoreError;
use crate::types::{Incident, IncidentStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;

/// The two live collections kept on the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedKind {
    /// Approved incidents, readable by anyone.
    Public,
    /// Pending incidents, privileged callers only.
    Moderation,
}

impl FeedKind {
    pub fn query(&self) -> FeedQuery {
        match self {
            FeedKind::Public => FeedQuery::by_status(IncidentStatus::Approved),
            FeedKind::Moderation => FeedQuery::by_status(IncidentStatus::Pending),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FeedKind::Public => "public",
            FeedKind::Moderation => "moderation",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOrder {
    CreatedAtDesc,
}

/// Filter plus ordering of a live query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedQuery {
    pub status: IncidentStatus,
    pub order: FeedOrder,
}

impl FeedQuery {
    pub fn by_status(status: IncidentStatus) -> Self {
        Self {
            status,
            order: FeedOrder::CreatedAtDesc,
        }
    }

    pub fn matches(&self, incident: &Incident) -> bool {
        incident.status == self.status
    }

    pub fn compare(&self, a: &Incident, b: &Incident) -> Ordering {
        match self.order {
            FeedOrder::CreatedAtDesc => b
                .created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id)),
        }
    }

    pub fn sort(&self, incidents: &mut [Incident]) {
        incidents.sort_by(|a, b| self.compare(a, b));
    }
}

/// One push from a live-query subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    /// Full matching set; replaces whatever the client held.
    Snapshot(Vec<Incident>),
    /// A document was written; it may or may not still match the query.
    Upsert(Incident),
    /// A document left the matching set.
    Removed(String),
    Error(StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Version {
    Seen { rank: u8, updated_at: DateTime<Utc> },
    Departed,
}

impl Version {
    fn of(incident: &Incident) -> Self {
        Version::Seen {
            rank: incident.status.rank(),
            updated_at: incident.updated_at,
        }
    }

    /// Whether `incoming` is older than what has already been applied.
    fn supersedes(&self, incoming: &Version) -> bool {
        match (self, incoming) {
            (Version::Departed, _) => true,
            (
                Version::Seen { rank, updated_at },
                Version::Seen {
                    rank: in_rank,
                    updated_at: in_updated,
                },
            ) => (rank, updated_at) > (in_rank, in_updated),
            (Version::Seen { .. }, Version::Departed) => false,
        }
    }
}

/// Client-side index of one feed, rebuilt from a snapshot and patched by
/// deltas. Deliveries out of it are always the full, ordered collection.
///
/// Redelivered or reordered events that would move a record backwards in
/// its lifecycle are ignored; a record that left the feed does not come
/// back, since both feeds select a single status and statuses are one-way.
#[derive(Debug, Clone)]
pub struct FeedIndex {
    query: FeedQuery,
    entries: HashMap<String, Incident>,
    versions: HashMap<String, Version>,
}

impl FeedIndex {
    pub fn new(query: FeedQuery) -> Self {
        Self {
            query,
            entries: HashMap::new(),
            versions: HashMap::new(),
        }
    }

    /// Replace everything with an authoritative snapshot.
    pub fn apply_snapshot(&mut self, docs: Vec<Incident>) {
        self.entries.clear();
        self.versions.clear();
        for doc in docs {
            self.versions.insert(doc.id.clone(), Version::of(&doc));
            if self.query.matches(&doc) {
                self.entries.insert(doc.id.clone(), doc);
            }
        }
    }

    /// Apply one delta. Returns whether the visible collection changed.
    pub fn apply_upsert(&mut self, doc: Incident) -> bool {
        let incoming = Version::of(&doc);
        if let Some(known) = self.versions.get(&doc.id) {
            if known.supersedes(&incoming) {
                return false;
            }
        }
        self.versions.insert(doc.id.clone(), incoming);

        if self.query.matches(&doc) {
            match self.entries.get(&doc.id) {
                Some(existing) if *existing == doc => false,
                _ => {
                    self.entries.insert(doc.id.clone(), doc);
                    true
                }
            }
        } else {
            self.entries.remove(&doc.id).is_some()
        }
    }

    pub fn apply_removal(&mut self, id: &str) -> bool {
        self.versions.insert(id.to_string(), Version::Departed);
        self.entries.remove(id).is_some()
    }

    /// Route a change event. Error events are not handled here.
    pub fn apply(&mut self, event: ChangeEvent) -> bool {
        match event {
            ChangeEvent::Snapshot(docs) => {
                self.apply_snapshot(docs);
                true
            }
            ChangeEvent::Upsert(doc) => self.apply_upsert(doc),
            ChangeEvent::Removed(id) => self.apply_removal(&id),
            ChangeEvent::Error(_) => false,
        }
    }

    pub fn snapshot(&self) -> Vec<Incident> {
        let mut docs: Vec<Incident> = self.entries.values().cloned().collect();
        self.query.sort(&mut docs);
        docs
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
