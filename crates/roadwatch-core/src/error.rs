use crate::types::IncidentStatus;
use serde::Serialize;
use thiserror::Error;

/// Draft field a validation failure is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Field {
    Type,
    Title,
    Location,
    Coordinates,
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Field::Type => "type",
            Field::Title => "title",
            Field::Location => "location",
            Field::Coordinates => "coordinates",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("invalid {field}: {reason}")]
pub struct ValidationError {
    pub field: Field,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: Field, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MediaUploadError {
    #[error("media upload timed out")]
    Timeout,
    #[error("media upload denied: {0}")]
    PermissionDenied(String),
    #[error("media upload failed: {0}")]
    Transport(String),
    #[error("photo is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },
}

/// Transport-level failures reported by an incident store.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("incident {0} not found")]
    NotFound(String),
    #[error("incident {id} is {actual}, write precondition failed")]
    PreconditionFailed { id: String, actual: IncidentStatus },
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("journal error: {0}")]
    Journal(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("could not persist incident: {0}")]
    Persistence(StoreError),
}

/// A moderation action that the lifecycle does not allow. `from` is `None`
/// when the incident does not exist.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("cannot move incident {id} from {} to {to}", .from.map(|s| s.as_str()).unwrap_or("<missing>"))]
pub struct InvalidTransition {
    pub id: String,
    pub from: Option<IncidentStatus>,
    pub to: IncidentStatus,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModerationError {
    #[error("caller is not allowed to moderate")]
    Forbidden,
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
    #[error("could not persist moderation: {0}")]
    Persistence(StoreError),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SubscriptionError {
    #[error("subscription denied: {0}")]
    PermissionDenied(String),
    #[error("subscription lost: {reason} (reconnect attempt {attempt})")]
    Disconnected { reason: String, attempt: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_names_field() {
        let err = ValidationError::new(Field::Title, "must not be empty");
        assert_eq!(err.to_string(), "invalid title: must not be empty");
    }

    #[test]
    fn test_invalid_transition_message() {
        let err = InvalidTransition {
            id: "abc".to_string(),
            from: Some(IncidentStatus::Approved),
            to: IncidentStatus::Rejected,
        };
        assert_eq!(err.to_string(), "cannot move incident abc from approved to rejected");

        let missing = InvalidTransition {
            id: "zzz".to_string(),
            from: None,
            to: IncidentStatus::Approved,
        };
        assert!(missing.to_string().contains("<missing>"));
    }
}
