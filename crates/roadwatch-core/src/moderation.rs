use crate::clock::Clock;
use crate::error::{InvalidTransition, ModerationError, StoreError};
use crate::store::{Authorizer, IncidentStore};
use crate::types::{Caller, Incident, IncidentPatch, IncidentStatus};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Applies the one-way `pending -> approved | rejected` lifecycle.
///
/// Repeating a decision on a record that is already terminal is an error,
/// not a silent success.
pub struct ModerationService {
    store: Arc<dyn IncidentStore>,
    authorizer: Arc<dyn Authorizer>,
    clock: Arc<dyn Clock>,
}

impl ModerationService {
    pub fn new(
        store: Arc<dyn IncidentStore>,
        authorizer: Arc<dyn Authorizer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            authorizer,
            clock,
        }
    }

    pub async fn approve(&self, caller: &Caller, id: &str) -> Result<Incident, ModerationError> {
        self.transition(caller, id, IncidentStatus::Approved).await
    }

    pub async fn reject(&self, caller: &Caller, id: &str) -> Result<Incident, ModerationError> {
        self.transition(caller, id, IncidentStatus::Rejected).await
    }

    async fn transition(
        &self,
        caller: &Caller,
        id: &str,
        target: IncidentStatus,
    ) -> Result<Incident, ModerationError> {
        if !self.authorizer.is_privileged(caller) {
            warn!("Unprivileged caller {:?} tried to set {} to {}", caller.user_id(), id, target);
            return Err(ModerationError::Forbidden);
        }

        let current = self
            .store
            .get(id)
            .await
            .map_err(ModerationError::Persistence)?
            .ok_or_else(|| InvalidTransition {
                id: id.to_string(),
                from: None,
                to: target,
            })?;

        if !current.status.can_transition_to(target) {
            return Err(InvalidTransition {
                id: id.to_string(),
                from: Some(current.status),
                to: target,
            }
            .into());
        }

        // never step a timestamp backwards, even if the clock did
        let now = self.clock.now().max(current.updated_at);
        let patch = IncidentPatch {
            expect_status: IncidentStatus::Pending,
            status: target,
            updated_at: now,
            approved_at: (target == IncidentStatus::Approved).then_some(now),
            rejected_at: (target == IncidentStatus::Rejected).then_some(now),
        };

        // The status is checked again by the store under its write lock; a
        // concurrent moderator that got there first surfaces here.
        match self.store.update(id, &patch).await {
            Ok(updated) => {
                info!("Incident {} {} by {:?}", id, target, caller.user_id());
                Ok(updated)
            }
            Err(StoreError::PreconditionFailed { actual, .. }) => Err(InvalidTransition {
                id: id.to_string(),
                from: Some(actual),
                to: target,
            }
            .into()),
            Err(StoreError::NotFound(_)) => Err(InvalidTransition {
                id: id.to_string(),
                from: None,
                to: target,
            }
            .into()),
            Err(e) => {
                error!("Failed to persist moderation of {}: {}", id, e);
                Err(ModerationError::Persistence(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::memory::MemoryIncidentStore;
    use crate::feed::FeedQuery;
    use crate::store::ChangeStream;
    use crate::types::{Authorship, Identity, NewIncident};
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use std::sync::atomic::Ordering;

    /// Reads lag behind writes: `get` still reports `pending` after another
    /// moderator has already decided.
    struct StaleReads {
        inner: Arc<MemoryIncidentStore>,
    }

    #[async_trait]
    impl IncidentStore for StaleReads {
        async fn create(&self, doc: &NewIncident) -> Result<String, StoreError> {
            self.inner.create(doc).await
        }

        async fn update(&self, id: &str, patch: &IncidentPatch) -> Result<Incident, StoreError> {
            self.inner.update(id, patch).await
        }

        async fn get(&self, id: &str) -> Result<Option<Incident>, StoreError> {
            Ok(self.inner.get(id).await?.map(|mut doc| {
                doc.status = IncidentStatus::Pending;
                doc
            }))
        }

        async fn query(&self, query: &FeedQuery) -> Result<Vec<Incident>, StoreError> {
            self.inner.query(query).await
        }

        async fn subscribe(&self, query: &FeedQuery) -> Result<ChangeStream, StoreError> {
            self.inner.subscribe(query).await
        }
    }

    struct AdminsOnly;

    impl Authorizer for AdminsOnly {
        fn is_privileged(&self, caller: &Caller) -> bool {
            caller.user_id() == Some("admin")
        }
    }

    fn admin() -> Caller {
        Caller::User(Identity {
            user_id: "admin".to_string(),
            name: "Admin".to_string(),
            email: "admin@example.org".to_string(),
        })
    }

    async fn seeded() -> (Arc<MemoryIncidentStore>, Arc<FixedClock>, ModerationService, String) {
        let store = Arc::new(MemoryIncidentStore::new());
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let created = clock.now();
        let id = store
            .create(&NewIncident {
                incident_type: "accident".to_string(),
                subtype: None,
                title: "Collision".to_string(),
                description: None,
                location: "Kaloum".to_string(),
                coordinates: None,
                image_ref: None,
                status: IncidentStatus::Pending,
                authorship: Authorship::Anonymous { name: None, email: None },
                created_at: created,
                updated_at: created,
            })
            .await
            .unwrap();
        let svc = ModerationService::new(store.clone(), Arc::new(AdminsOnly), clock.clone());
        (store, clock, svc, id)
    }

    #[tokio::test]
    async fn test_approve_sets_status_and_timestamps() {
        let (store, clock, svc, id) = seeded().await;
        clock.advance(Duration::seconds(30));

        let approved = svc.approve(&admin(), &id).await.unwrap();
        assert_eq!(approved.status, IncidentStatus::Approved);
        assert_eq!(approved.approved_at, Some(clock.now()));
        assert_eq!(approved.updated_at, clock.now());
        assert!(approved.rejected_at.is_none());

        let stored = store.get(&id).await.unwrap().unwrap();
        assert_eq!(stored, approved);
    }

    #[tokio::test]
    async fn test_terminal_states_reject_further_transitions() {
        let (store, _clock, svc, id) = seeded().await;
        svc.approve(&admin(), &id).await.unwrap();

        let err = svc.reject(&admin(), &id).await.unwrap_err();
        assert_eq!(
            err,
            ModerationError::InvalidTransition(InvalidTransition {
                id: id.clone(),
                from: Some(IncidentStatus::Approved),
                to: IncidentStatus::Rejected,
            })
        );
        // double approval is surfaced, not absorbed
        assert!(matches!(
            svc.approve(&admin(), &id).await,
            Err(ModerationError::InvalidTransition(_))
        ));
        let stored = store.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.status, IncidentStatus::Approved);
    }

    #[tokio::test]
    async fn test_unknown_incident_is_invalid_transition() {
        let (_store, _clock, svc, _id) = seeded().await;
        let err = svc.approve(&admin(), "nope").await.unwrap_err();
        assert!(matches!(
            err,
            ModerationError::InvalidTransition(InvalidTransition { from: None, .. })
        ));
    }

    #[tokio::test]
    async fn test_unprivileged_caller_forbidden() {
        let (store, _clock, svc, id) = seeded().await;
        assert_eq!(svc.approve(&Caller::Anonymous, &id).await, Err(ModerationError::Forbidden));
        let stored = store.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.status, IncidentStatus::Pending);
    }

    #[tokio::test]
    async fn test_concurrent_approvals_exactly_one_wins() {
        let (store, _clock, svc, id) = seeded().await;
        let svc = Arc::new(svc);

        let a = tokio::spawn({
            let svc = svc.clone();
            let id = id.clone();
            async move { svc.approve(&admin(), &id).await }
        });
        let b = tokio::spawn({
            let svc = svc.clone();
            let id = id.clone();
            async move { svc.approve(&admin(), &id).await }
        });
        let results = [a.await.unwrap(), b.await.unwrap()];

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(ModerationError::InvalidTransition(_))))
                .count(),
            1
        );
        assert_eq!(store.get(&id).await.unwrap().unwrap().status, IncidentStatus::Approved);
    }

    #[tokio::test]
    async fn test_clock_skew_never_moves_updated_at_backwards() {
        let (_store, clock, svc, id) = seeded().await;
        let created = clock.now();
        clock.advance(Duration::seconds(-600));

        let rejected = svc.reject(&admin(), &id).await.unwrap();
        assert_eq!(rejected.updated_at, created);
        assert_eq!(rejected.rejected_at, Some(created));
    }

    #[tokio::test]
    async fn test_store_outage_is_persistence_error() {
        let (store, _clock, svc, id) = seeded().await;
        store.faults.unavailable.store(true, Ordering::SeqCst);
        assert!(matches!(
            svc.approve(&admin(), &id).await,
            Err(ModerationError::Persistence(StoreError::Unavailable(_)))
        ));
    }

    #[tokio::test]
    async fn test_write_time_precondition_loses_race() {
        let (store, clock, first, id) = seeded().await;
        first.approve(&admin(), &id).await.unwrap();
        let approved = store.get(&id).await.unwrap().unwrap();

        let stale = Arc::new(StaleReads {
            inner: store.clone(),
        });
        let second = ModerationService::new(stale, Arc::new(AdminsOnly), clock.clone());
        clock.advance(Duration::seconds(5));

        let err = second.reject(&admin(), &id).await.unwrap_err();
        assert_eq!(
            err,
            ModerationError::InvalidTransition(InvalidTransition {
                id: id.clone(),
                from: Some(IncidentStatus::Approved),
                to: IncidentStatus::Rejected,
            })
        );
        assert_eq!(store.get(&id).await.unwrap().unwrap(), approved);
    }
}
