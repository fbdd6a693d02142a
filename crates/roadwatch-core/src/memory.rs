use crate::error::StoreError;
use crate::feed::{ChangeEvent, FeedQuery};
use crate::journal::{Journal, JournalOp};
use crate::store::{ChangeStream, IncidentStore};
use crate::types::{Incident, IncidentPatch, NewIncident};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, info};

struct Subscriber {
    query: FeedQuery,
    tx: mpsc::UnboundedSender<ChangeEvent>,
}

#[derive(Default)]
struct Inner {
    docs: HashMap<String, Incident>,
    subscribers: Vec<Subscriber>,
}

impl Inner {
    /// Fan a write out to live queries. Subscribers only ever see documents
    /// matching their query; a document that stops matching is announced as
    /// a removal.
    fn publish(&mut self, before: Option<&Incident>, after: &Incident) {
        self.subscribers.retain(|sub| {
            let event = if sub.query.matches(after) {
                Some(ChangeEvent::Upsert(after.clone()))
            } else if before.map(|b| sub.query.matches(b)).unwrap_or(false) {
                Some(ChangeEvent::Removed(after.id.clone()))
            } else {
                None
            };
            match event {
                Some(event) => sub.tx.send(event).is_ok(),
                None => !sub.tx.is_closed(),
            }
        });
    }
}

/// Switches for simulating an unhealthy backend.
#[derive(Debug, Default)]
pub struct StoreFaults {
    pub unavailable: AtomicBool,
    pub deny_subscriptions: AtomicBool,
}

/// In-process incident store with optional journal persistence.
///
/// Every write and its fan-out happen under one lock, so subscribers see
/// writes in the order they were applied.
pub struct MemoryIncidentStore {
    inner: Mutex<Inner>,
    journal: Option<Mutex<Journal>>,
    pub faults: StoreFaults,
}

impl MemoryIncidentStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            journal: None,
            faults: StoreFaults::default(),
        }
    }

    /// Replay `path` and keep appending to it.
    pub fn open(path: PathBuf) -> anyhow::Result<Self> {
        let docs = Journal::replay(&path)?;
        info!("Restored {} incidents from {}", docs.len(), path.display());
        let journal = Journal::open(path)?;

        let inner = Inner {
            docs: docs.into_iter().map(|d| (d.id.clone(), d)).collect(),
            subscribers: Vec::new(),
        };
        Ok(Self {
            inner: Mutex::new(inner),
            journal: Some(Mutex::new(journal)),
            faults: StoreFaults::default(),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.faults.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("backend offline".to_string()));
        }
        Ok(())
    }

    fn write_journal(&self, op: JournalOp, incident: &Incident) -> Result<(), StoreError> {
        if let Some(journal) = &self.journal {
            let mut journal = journal
                .lock()
                .map_err(|_| StoreError::Journal("journal lock poisoned".to_string()))?;
            journal
                .append(op, incident)
                .map_err(|e| StoreError::Journal(e.to_string()))?;
        }
        Ok(())
    }

    /// Drop every live query, as a transport loss would.
    pub fn disconnect_all(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            let n = inner.subscribers.len();
            inner.subscribers.clear();
            debug!("Disconnected {} subscribers", n);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().map(|i| i.subscribers.len()).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|i| i.docs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryIncidentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IncidentStore for MemoryIncidentStore {
    async fn create(&self, doc: &NewIncident) -> Result<String, StoreError> {
        self.check_available()?;
        let mut inner = self.lock()?;

        let id = uuid::Uuid::new_v4().simple().to_string();
        let incident = Incident::from_new(id.clone(), doc.clone());
        self.write_journal(JournalOp::Create, &incident)?;

        inner.docs.insert(id.clone(), incident.clone());
        inner.publish(None, &incident);
        Ok(id)
    }

    async fn update(&self, id: &str, patch: &IncidentPatch) -> Result<Incident, StoreError> {
        self.check_available()?;
        let mut inner = self.lock()?;

        let before = inner
            .docs
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if before.status != patch.expect_status {
            return Err(StoreError::PreconditionFailed {
                id: id.to_string(),
                actual: before.status,
            });
        }

        let mut after = before.clone();
        after.apply_patch(patch);
        self.write_journal(JournalOp::Update, &after)?;

        inner.docs.insert(id.to_string(), after.clone());
        inner.publish(Some(&before), &after);
        Ok(after)
    }

    async fn get(&self, id: &str) -> Result<Option<Incident>, StoreError> {
        self.check_available()?;
        Ok(self.lock()?.docs.get(id).cloned())
    }

    async fn query(&self, query: &FeedQuery) -> Result<Vec<Incident>, StoreError> {
        self.check_available()?;
        let inner = self.lock()?;
        let mut docs: Vec<Incident> = inner
            .docs
            .values()
            .filter(|d| query.matches(d))
            .cloned()
            .collect();
        query.sort(&mut docs);
        Ok(docs)
    }

    async fn subscribe(&self, query: &FeedQuery) -> Result<ChangeStream, StoreError> {
        self.check_available()?;
        if self.faults.deny_subscriptions.load(Ordering::SeqCst) {
            return Err(StoreError::PermissionDenied(format!(
                "live query on {} incidents",
                query.status
            )));
        }

        let mut inner = self.lock()?;
        let mut snapshot: Vec<Incident> = inner
            .docs
            .values()
            .filter(|d| query.matches(d))
            .cloned()
            .collect();
        query.sort(&mut snapshot);

        let (tx, rx) = mpsc::unbounded_channel();
        // the receiver is still in hand, this cannot fail
        let _ = tx.send(ChangeEvent::Snapshot(snapshot));
        inner.subscribers.push(Subscriber { query: *query, tx });
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::FeedKind;
    use crate::types::{Authorship, IncidentStatus};
    use chrono::Utc;

    fn new_doc(title: &str) -> NewIncident {
        let now = Utc::now();
        NewIncident {
            incident_type: "roadwork".to_string(),
            subtype: None,
            title: title.to_string(),
            description: None,
            location: "Dixinn".to_string(),
            coordinates: None,
            image_ref: None,
            status: IncidentStatus::Pending,
            authorship: Authorship::Anonymous { name: None, email: None },
            created_at: now,
            updated_at: now,
        }
    }

    fn approve_patch() -> IncidentPatch {
        let now = Utc::now();
        IncidentPatch {
            expect_status: IncidentStatus::Pending,
            status: IncidentStatus::Approved,
            updated_at: now,
            approved_at: Some(now),
            rejected_at: None,
        }
    }

    #[tokio::test]
    async fn test_update_checks_precondition_at_write_time() {
        let store = MemoryIncidentStore::new();
        let id = store.create(&new_doc("a")).await.unwrap();

        let updated = store.update(&id, &approve_patch()).await.unwrap();
        assert_eq!(updated.status, IncidentStatus::Approved);

        let err = store.update(&id, &approve_patch()).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::PreconditionFailed {
                id: id.clone(),
                actual: IncidentStatus::Approved
            }
        );
        assert_eq!(
            store.update("missing", &approve_patch()).await.unwrap_err(),
            StoreError::NotFound("missing".to_string())
        );
    }

    #[tokio::test]
    async fn test_subscription_sees_only_matching_documents() {
        let store = MemoryIncidentStore::new();
        let mut public = store.subscribe(&FeedKind::Public.query()).await.unwrap();
        let mut moderation = store.subscribe(&FeedKind::Moderation.query()).await.unwrap();

        assert_eq!(public.recv().await, Some(ChangeEvent::Snapshot(vec![])));
        assert_eq!(moderation.recv().await, Some(ChangeEvent::Snapshot(vec![])));

        let id = store.create(&new_doc("a")).await.unwrap();
        match moderation.recv().await {
            Some(ChangeEvent::Upsert(doc)) => assert_eq!(doc.id, id),
            other => panic!("unexpected {:?}", other),
        }
        assert!(public.try_recv().is_err());

        store.update(&id, &approve_patch()).await.unwrap();
        assert_eq!(moderation.recv().await, Some(ChangeEvent::Removed(id.clone())));
        match public.recv().await {
            Some(ChangeEvent::Upsert(doc)) => assert_eq!(doc.status, IncidentStatus::Approved),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_disconnect_ends_streams() {
        let store = MemoryIncidentStore::new();
        let mut rx = store.subscribe(&FeedKind::Public.query()).await.unwrap();
        rx.recv().await.unwrap();
        store.disconnect_all();
        assert_eq!(rx.recv().await, None);
        assert_eq!(store.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_store_rejects_writes() {
        let store = MemoryIncidentStore::new();
        store.faults.unavailable.store(true, Ordering::SeqCst);
        assert!(matches!(
            store.create(&new_doc("a")).await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_journal_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.ndjson");

        let id = {
            let store = MemoryIncidentStore::open(path.clone()).unwrap();
            let id = store.create(&new_doc("a")).await.unwrap();
            store.update(&id, &approve_patch()).await.unwrap();
            id
        };

        let store = MemoryIncidentStore::open(path).unwrap();
        let doc = store.get(&id).await.unwrap().unwrap();
        assert_eq!(doc.status, IncidentStatus::Approved);
        assert!(doc.approved_at.is_some());
    }

    #[tokio::test]
    async fn test_restarts_after_crash_mid_write() {
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.ndjson");

        let first = {
            let store = MemoryIncidentStore::open(path.clone()).unwrap();
            store.create(&new_doc("a")).await.unwrap()
        };
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        write!(file, "{{\"ts\":\"2024-").unwrap();
        drop(file);

        let second = {
            let store = MemoryIncidentStore::open(path.clone()).unwrap();
            let id = store.create(&new_doc("b")).await.unwrap();
            store.update(&id, &approve_patch()).await.unwrap();
            id
        };

        let store = MemoryIncidentStore::open(path).unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.get(&first).await.unwrap().is_some());
        assert_eq!(
            store.get(&second).await.unwrap().unwrap().status,
            IncidentStatus::Approved
        );
    }
}
