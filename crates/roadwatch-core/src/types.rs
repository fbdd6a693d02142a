use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

/// Moderation status of an incident.
///
/// `Pending` is the only non-terminal state; the legal moves are
/// `Pending -> Approved` and `Pending -> Rejected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    Pending,
    Approved,
    Rejected,
}

impl IncidentStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, IncidentStatus::Pending)
    }

    pub fn can_transition_to(&self, target: IncidentStatus) -> bool {
        matches!(
            (self, target),
            (IncidentStatus::Pending, IncidentStatus::Approved)
                | (IncidentStatus::Pending, IncidentStatus::Rejected)
        )
    }

    /// Position in the one-way lifecycle, used to discard regressing events.
    pub fn rank(&self) -> u8 {
        match self {
            IncidentStatus::Pending => 0,
            IncidentStatus::Approved | IncidentStatus::Rejected => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentStatus::Pending => "pending",
            IncidentStatus::Approved => "approved",
            IncidentStatus::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An authenticated submitter, as resolved by the auth layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: String,
    pub name: String,
    pub email: String,
}

/// Whoever is calling into the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    Anonymous,
    User(Identity),
}

impl Caller {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Caller::Anonymous => None,
            Caller::User(identity) => Some(identity),
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        self.identity().map(|i| i.user_id.as_str())
    }
}

/// Contact details an anonymous reporter may leave behind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    pub name: Option<String>,
    pub email: Option<String>,
}

/// Who submitted an incident. Anonymity is the absence of a user id, so the
/// two cannot disagree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "AuthorshipDoc", into = "AuthorshipDoc")]
pub enum Authorship {
    Authenticated {
        user_id: String,
        name: String,
        email: String,
    },
    Anonymous {
        name: Option<String>,
        email: Option<String>,
    },
}

impl Authorship {
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Authorship::Anonymous { .. })
    }

    pub fn user_id(&self) -> Option<&str> {
        match self {
            Authorship::Authenticated { user_id, .. } => Some(user_id),
            Authorship::Anonymous { .. } => None,
        }
    }
}

// Stored document layout: `{userId, name, email, isAnonymous}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthorshipDoc {
    user_id: Option<String>,
    name: Option<String>,
    email: Option<String>,
    is_anonymous: bool,
}

impl TryFrom<AuthorshipDoc> for Authorship {
    type Error = String;

    fn try_from(doc: AuthorshipDoc) -> Result<Self, Self::Error> {
        match (doc.user_id, doc.is_anonymous) {
            (Some(user_id), false) => Ok(Authorship::Authenticated {
                user_id,
                name: doc.name.unwrap_or_default(),
                email: doc.email.unwrap_or_default(),
            }),
            (None, true) => Ok(Authorship::Anonymous {
                name: doc.name,
                email: doc.email,
            }),
            (Some(_), true) => Err("anonymous authorship must not carry a userId".to_string()),
            (None, false) => Err("authenticated authorship requires a userId".to_string()),
        }
    }
}

impl From<Authorship> for AuthorshipDoc {
    fn from(authorship: Authorship) -> Self {
        match authorship {
            Authorship::Authenticated {
                user_id,
                name,
                email,
            } => AuthorshipDoc {
                user_id: Some(user_id),
                name: Some(name),
                email: Some(email),
                is_anonymous: false,
            },
            Authorship::Anonymous { name, email } => AuthorshipDoc {
                user_id: None,
                name,
                email,
                is_anonymous: true,
            },
        }
    }
}

/// What a reporter fills in before submitting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentDraft {
    #[serde(rename = "type")]
    pub incident_type: String,
    #[serde(default)]
    pub subtype: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub location: String,
    #[serde(default)]
    pub coordinates: Option<Coordinates>,
}

/// A photo handed to the submission service.
#[derive(Debug, Clone)]
pub struct MediaBlob {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Incident document as written by `create`, before the store assigns an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewIncident {
    #[serde(rename = "type")]
    pub incident_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub location: String,
    pub coordinates: Option<Coordinates>,
    pub image_ref: Option<String>,
    pub status: IncidentStatus,
    pub authorship: Authorship,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Incident {
    pub id: String,
    #[serde(rename = "type")]
    pub incident_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub location: String,
    pub coordinates: Option<Coordinates>,
    pub image_ref: Option<String>,
    pub status: IncidentStatus,
    pub authorship: Authorship,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected_at: Option<DateTime<Utc>>,
}

impl Incident {
    pub fn from_new(id: String, doc: NewIncident) -> Self {
        Self {
            id,
            incident_type: doc.incident_type,
            subtype: doc.subtype,
            title: doc.title,
            description: doc.description,
            location: doc.location,
            coordinates: doc.coordinates,
            image_ref: doc.image_ref,
            status: doc.status,
            authorship: doc.authorship,
            created_at: doc.created_at,
            updated_at: doc.updated_at,
            approved_at: None,
            rejected_at: None,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.authorship.is_anonymous()
    }

    /// Apply a status patch in place. Callers are expected to have checked
    /// the precondition already; this only copies fields.
    pub fn apply_patch(&mut self, patch: &IncidentPatch) {
        self.status = patch.status;
        self.updated_at = patch.updated_at;
        if let Some(ts) = patch.approved_at {
            self.approved_at = Some(ts);
        }
        if let Some(ts) = patch.rejected_at {
            self.rejected_at = Some(ts);
        }
    }
}

/// Point update issued by the moderation state machine. `expect_status` is
/// checked by the store at write time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentPatch {
    pub expect_status: IncidentStatus,
    pub status: IncidentStatus,
    pub updated_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
}
