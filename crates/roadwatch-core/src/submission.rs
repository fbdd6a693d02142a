use crate::catalog::IncidentTypeCatalog;
use crate::clock::Clock;
use crate::error::{Field, MediaUploadError, SubmitError, ValidationError};
use crate::store::{IncidentStore, MediaStore};
use crate::types::{
    Authorship, ContactInfo, Identity, Incident, IncidentDraft, IncidentStatus, MediaBlob,
    NewIncident,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const DEFAULT_MEDIA_TIMEOUT: Duration = Duration::from_secs(15);

/// Result of a successful submission. `media_error` is set when a photo was
/// supplied but could not be attached; the record exists either way.
#[derive(Debug, Clone)]
pub struct Submission {
    pub incident: Incident,
    pub media_error: Option<MediaUploadError>,
}

/// Validates drafts and writes new incidents in `pending`.
pub struct SubmissionService {
    store: Arc<dyn IncidentStore>,
    media: Arc<dyn MediaStore>,
    catalog: Arc<IncidentTypeCatalog>,
    clock: Arc<dyn Clock>,
    media_timeout: Duration,
}

impl SubmissionService {
    pub fn new(
        store: Arc<dyn IncidentStore>,
        media: Arc<dyn MediaStore>,
        catalog: Arc<IncidentTypeCatalog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            media,
            catalog,
            clock,
            media_timeout: DEFAULT_MEDIA_TIMEOUT,
        }
    }

    pub fn with_media_timeout(mut self, timeout: Duration) -> Self {
        self.media_timeout = timeout;
        self
    }

    pub fn validate(&self, draft: &IncidentDraft) -> Result<(), ValidationError> {
        if !self.catalog.contains(&draft.incident_type) {
            return Err(ValidationError::new(
                Field::Type,
                format!("unknown incident type '{}'", draft.incident_type),
            ));
        }
        if draft.title.trim().is_empty() {
            return Err(ValidationError::new(Field::Title, "must not be empty"));
        }
        if draft.location.trim().is_empty() {
            return Err(ValidationError::new(Field::Location, "must not be empty"));
        }
        if let Some(coords) = &draft.coordinates {
            if !coords.is_valid() {
                return Err(ValidationError::new(
                    Field::Coordinates,
                    format!("({}, {}) is not a position on earth", coords.lat, coords.lng),
                ));
            }
        }
        Ok(())
    }

    /// Create a pending incident.
    ///
    /// Validation happens before anything is uploaded or written. A photo
    /// is best effort: any upload failure is logged, reported back in the
    /// returned [`Submission`], and the record is written without it. A
    /// store failure on the create itself is returned as
    /// [`SubmitError::Persistence`] and is not retried.
    pub async fn submit(
        &self,
        draft: IncidentDraft,
        submitter: Option<&Identity>,
        media: Option<MediaBlob>,
        contact: ContactInfo,
    ) -> Result<Submission, SubmitError> {
        self.validate(&draft)?;

        let mut media_error = None;
        let image_ref = match media {
            Some(blob) => match self.upload(&blob).await {
                Ok(reference) => Some(reference),
                Err(e) => {
                    warn!("Photo upload failed, submitting without it: {}", e);
                    media_error = Some(e);
                    None
                }
            },
            None => None,
        };

        let authorship = match submitter {
            Some(identity) => Authorship::Authenticated {
                user_id: identity.user_id.clone(),
                name: identity.name.clone(),
                email: identity.email.clone(),
            },
            None => Authorship::Anonymous {
                name: non_empty(contact.name),
                email: non_empty(contact.email),
            },
        };

        let now = self.clock.now();
        let doc = NewIncident {
            incident_type: draft.incident_type,
            subtype: non_empty(draft.subtype),
            title: draft.title.trim().to_string(),
            description: non_empty(draft.description),
            location: draft.location.trim().to_string(),
            coordinates: draft.coordinates,
            image_ref,
            status: IncidentStatus::Pending,
            authorship,
            created_at: now,
            updated_at: now,
        };

        let id = self.store.create(&doc).await.map_err(|e| {
            error!("Failed to persist incident '{}': {}", doc.title, e);
            SubmitError::Persistence(e)
        })?;

        info!(
            "Incident {} submitted ({}, anonymous={}, photo={})",
            id,
            doc.incident_type,
            doc.authorship.is_anonymous(),
            doc.image_ref.is_some()
        );

        Ok(Submission {
            incident: Incident::from_new(id, doc),
            media_error,
        })
    }

    async fn upload(&self, blob: &MediaBlob) -> Result<String, MediaUploadError> {
        match tokio::time::timeout(self.media_timeout, self.media.upload(blob)).await {
            Ok(result) => result,
            Err(_) => Err(MediaUploadError::Timeout),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
