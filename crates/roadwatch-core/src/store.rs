use crate::error::{MediaUploadError, StoreError};
use crate::feed::{ChangeEvent, FeedQuery};
use crate::types::{Caller, Incident, IncidentPatch, MediaBlob, NewIncident};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Receiving half of a live query. The stream ending means the connection
/// is gone and the subscriber has to reconnect.
pub type ChangeStream = mpsc::UnboundedReceiver<ChangeEvent>;

/// Authoritative document store for incidents.
#[async_trait]
pub trait IncidentStore: Send + Sync {
    /// Write a new document atomically and return the id the store assigned.
    async fn create(&self, doc: &NewIncident) -> Result<String, StoreError>;

    /// Point update. The store checks `patch.expect_status` against the
    /// current document under the same lock that applies the write and
    /// answers `PreconditionFailed` if it no longer holds.
    async fn update(&self, id: &str, patch: &IncidentPatch) -> Result<Incident, StoreError>;

    async fn get(&self, id: &str) -> Result<Option<Incident>, StoreError>;

    /// One-shot query, ordered per `query`.
    async fn query(&self, query: &FeedQuery) -> Result<Vec<Incident>, StoreError>;

    /// Live query. The first event is the current snapshot; later events
    /// are deltas for documents entering, changing in, or leaving the set.
    async fn subscribe(&self, query: &FeedQuery) -> Result<ChangeStream, StoreError>;
}

#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Store a blob and return its reference.
    async fn upload(&self, blob: &MediaBlob) -> Result<String, MediaUploadError>;
}

/// Decides who may moderate and read pending incidents.
pub trait Authorizer: Send + Sync {
    fn is_privileged(&self, caller: &Caller) -> bool;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub incident_id: String,
    pub title: String,
    pub location: String,
    pub severity: crate::traffic::Severity,
}

/// Fire-and-forget alert delivery.
pub trait AlertSink: Send + Sync {
    fn emit(&self, alert: &Alert) -> anyhow::Result<()>;
}
