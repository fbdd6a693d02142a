use crate::auth::caller_from_headers;
use crate::media::DiskMediaStore;
use crate::metrics;
use crate::state::AppState;
use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
    routing::{get, post},
    Router,
};
use base64::Engine;
use futures_util::stream::{self, Stream};
use roadwatch_core::error::{
    InvalidTransition, MediaUploadError, ModerationError, StoreError, SubmitError, ValidationError,
};
use roadwatch_core::feed::FeedKind;
use roadwatch_core::types::{ContactInfo, Coordinates, Incident, IncidentDraft, IncidentStatus, MediaBlob};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitRequest {
    #[serde(default, rename = "type")]
    incident_type: String,
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    location: String,
    #[serde(default)]
    coordinates: Option<Coordinates>,
    #[serde(default)]
    contact: ContactInfo,
    #[serde(default)]
    photo: Option<PhotoUpload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PhotoUpload {
    content_type: String,
    data_base64: String,
}

impl PhotoUpload {
    fn decode(self) -> Result<MediaBlob, base64::DecodeError> {
        let bytes = base64::engine::general_purpose::STANDARD.decode(self.data_base64.trim())?;
        Ok(MediaBlob {
            content_type: self.content_type,
            bytes,
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    incident: Incident,
    #[serde(skip_serializing_if = "Option::is_none")]
    warning: Option<String>,
}

/// Error body: `{"error": "...", "field": "..."}`.
#[derive(Debug)]
pub enum ApiError {
    Validation(ValidationError),
    Forbidden,
    Conflict(InvalidTransition),
    NotFound(String),
    BadRequest(String),
    Unavailable(StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, field) = match self {
            ApiError::Validation(e) => {
                (StatusCode::UNPROCESSABLE_ENTITY, e.to_string(), Some(e.field))
            }
            ApiError::Forbidden => (
                StatusCode::FORBIDDEN,
                "caller is not allowed to moderate".to_string(),
                None,
            ),
            ApiError::Conflict(e) => (StatusCode::CONFLICT, e.to_string(), None),
            ApiError::NotFound(what) => (StatusCode::NOT_FOUND, format!("{} not found", what), None),
            ApiError::BadRequest(reason) => (StatusCode::BAD_REQUEST, reason, None),
            ApiError::Unavailable(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string(), None),
        };
        let body = match field {
            Some(field) => serde_json::json!({ "error": message, "field": field }),
            None => serde_json::json!({ "error": message }),
        };
        (status, Json(body)).into_response()
    }
}

impl From<SubmitError> for ApiError {
    fn from(e: SubmitError) -> Self {
        match e {
            SubmitError::Validation(e) => ApiError::Validation(e),
            SubmitError::Persistence(e) => ApiError::Unavailable(e),
        }
    }
}

impl From<ModerationError> for ApiError {
    fn from(e: ModerationError) -> Self {
        match e {
            ModerationError::Forbidden => ApiError::Forbidden,
            ModerationError::InvalidTransition(e) => ApiError::Conflict(e),
            ModerationError::Persistence(e) => ApiError::Unavailable(e),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => ApiError::NotFound(format!("incident {}", id)),
            StoreError::PermissionDenied(_) => ApiError::Forbidden,
            other => ApiError::Unavailable(other),
        }
    }
}

fn media_failure_kind(e: &MediaUploadError) -> &'static str {
    match e {
        MediaUploadError::Timeout => "timeout",
        MediaUploadError::PermissionDenied(_) => "permission_denied",
        MediaUploadError::Transport(_) => "transport",
        MediaUploadError::TooLarge { .. } => "too_large",
    }
}

pub fn router(state: AppState) -> Router {
    let body_limit = state.max_body_bytes;
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/types", get(types_handler))
        .route("/incidents", post(submit_handler))
        .route("/incidents/public", get(public_feed_handler))
        .route("/incidents/pending", get(pending_feed_handler))
        .route("/incidents/:id/approve", post(approve_handler))
        .route("/incidents/:id/reject", post(reject_handler))
        .route("/markers", get(markers_handler))
        .route("/alerts", get(alerts_handler))
        .route("/alerts/stream", get(alert_stream_handler))
        .route("/media/:reference", get(media_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.health())
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match &state.prometheus {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, "metrics exporter not installed\n".to_string()),
    }
}

async fn types_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.catalog.as_ref().clone())
}

async fn submit_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let caller = caller_from_headers(&headers);
    let mut warning = None;

    let media = match req.photo {
        Some(photo) => match photo.decode() {
            Ok(blob) => Some(blob),
            Err(e) => {
                warn!("Photo payload could not be decoded: {}", e);
                metrics::record_media_failure("decode");
                warning = Some(format!("photo not attached: {}", e));
                None
            }
        },
        None => None,
    };

    let draft = IncidentDraft {
        incident_type: req.incident_type,
        subtype: req.subtype,
        title: req.title,
        description: req.description,
        location: req.location,
        coordinates: req.coordinates,
    };

    let submission = match state
        .submission
        .submit(draft, caller.identity(), media, req.contact)
        .await
    {
        Ok(submission) => submission,
        Err(e) => {
            let reason = match &e {
                SubmitError::Validation(_) => "validation",
                SubmitError::Persistence(_) => "persistence",
            };
            metrics::record_submission_rejected(reason);
            return Err(e.into());
        }
    };

    if let Some(e) = &submission.media_error {
        metrics::record_media_failure(media_failure_kind(e));
        warning = Some(format!("photo not attached: {}", e));
    }
    metrics::record_submission(
        &submission.incident.incident_type,
        submission.incident.is_anonymous(),
    );

    Ok((
        StatusCode::CREATED,
        Json(SubmitResponse {
            incident: submission.incident,
            warning,
        }),
    ))
}

async fn public_feed_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.pipeline.public_feed())
}

async fn pending_feed_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Incident>>, ApiError> {
    let caller = caller_from_headers(&headers);
    if !state.authorizer.is_privileged(&caller) {
        return Err(ApiError::Forbidden);
    }
    let pending = state.store.query(&FeedKind::Moderation.query()).await?;
    Ok(Json(pending))
}

async fn approve_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Incident>, ApiError> {
    let caller = caller_from_headers(&headers);
    let result = state.moderation.approve(&caller, &id).await;
    moderation_response(IncidentStatus::Approved, result)
}

async fn reject_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Incident>, ApiError> {
    let caller = caller_from_headers(&headers);
    let result = state.moderation.reject(&caller, &id).await;
    moderation_response(IncidentStatus::Rejected, result)
}

fn moderation_response(
    target: IncidentStatus,
    result: Result<Incident, ModerationError>,
) -> Result<Json<Incident>, ApiError> {
    let outcome = match &result {
        Ok(_) => "ok",
        Err(ModerationError::Forbidden) => "forbidden",
        Err(ModerationError::InvalidTransition(_)) => "invalid_transition",
        Err(ModerationError::Persistence(_)) => "persistence",
    };
    metrics::record_transition(target.as_str(), outcome);
    Ok(Json(result?))
}

async fn markers_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.markers.current())
}

async fn alerts_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.alerts.recent())
}

async fn alert_stream_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.alerts.listen();
    let events = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(alert) => match Event::default().event("alert").json_data(&alert) {
                    Ok(event) => return Some((Ok::<_, Infallible>(event), rx)),
                    Err(e) => error!("Failed to encode alert {}: {}", alert.incident_id, e),
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Alert stream listener fell behind, {} alerts skipped", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}

async fn media_handler(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> Result<Response, ApiError> {
    if !DiskMediaStore::is_valid_ref(&reference) {
        return Err(ApiError::BadRequest(format!(
            "'{}' is not a media reference",
            reference
        )));
    }
    match state.media.fetch(&reference).await {
        Ok(Some((meta, bytes))) => {
            Ok(([(header::CONTENT_TYPE, meta.content_type)], bytes).into_response())
        }
        Ok(None) => Err(ApiError::NotFound(format!("media {}", reference))),
        Err(e) => {
            error!("Failed to read media {}: {}", reference, e);
            Err(ApiError::Unavailable(StoreError::Unavailable(e.to_string())))
        }
    }
}
