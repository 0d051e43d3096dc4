//! JSON data-plane served over HTTP.
//!
//! Thin translation layer only: each route maps 1:1 onto an
//! [`ApprovalService`] method and carries no policy of its own. The web UI
//! consuming these routes lives elsewhere; nothing here renders HTML.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::debug;

use gatehouse_core::Error;
use gatehouse_core::entry::{Decision, PendingEntry};

use crate::approval::{ApprovalService, RespondParams};

/// Build the data-plane router.
pub fn router(service: Arc<ApprovalService>) -> Router {
    Router::new()
        .route("/api/pending", get(pending))
        .route("/api/respond", post(respond))
        .route("/api/session-allow", post(session_allow))
        .route("/api/session-reset", post(session_reset))
        .route("/api/session-end", post(session_end))
        .route("/api/submit-prompt", post(submit_prompt))
        .route("/api/dismiss-prompt", post(dismiss_prompt))
        .with_state(service)
}

#[derive(Debug, Serialize)]
struct PendingBody {
    requests: Vec<PendingEntry>,
}

#[derive(Debug, Serialize)]
struct OkBody {
    ok: bool,
}

impl OkBody {
    const OK: Self = Self { ok: true };
}

#[derive(Debug, Deserialize)]
struct RespondBody {
    id: String,
    decision: Decision,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    allow_pattern: Option<String>,
    #[serde(default)]
    allow_patterns: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct SessionAllowBody {
    id: String,
    #[serde(default)]
    session_id: String,
    #[serde(default)]
    tool_name: String,
}

#[derive(Debug, Deserialize)]
struct SessionBody {
    #[serde(default)]
    session_id: String,
    #[serde(default)]
    source: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PromptBody {
    id: String,
    #[serde(default)]
    prompt: String,
}

#[derive(Debug, Deserialize)]
struct DismissBody {
    id: String,
}

async fn pending(
    State(service): State<Arc<ApprovalService>>,
) -> Result<Json<PendingBody>, ApiError> {
    let requests = service.list_pending().await?;
    Ok(Json(PendingBody { requests }))
}

async fn respond(
    State(service): State<Arc<ApprovalService>>,
    Json(body): Json<RespondBody>,
) -> Result<Json<OkBody>, ApiError> {
    let params = RespondParams {
        id: body.id,
        decision: body.decision,
        message: body.message.filter(|m| !m.is_empty()),
        allow_pattern: body.allow_pattern,
        allow_patterns: body.allow_patterns,
    };
    match service.respond(params).await {
        Ok(_) => Ok(Json(OkBody::OK)),
        Err(e) => already_resolved_is_ok(e),
    }
}

async fn session_allow(
    State(service): State<Arc<ApprovalService>>,
    Json(body): Json<SessionAllowBody>,
) -> Result<Json<OkBody>, ApiError> {
    match service
        .session_allow(&body.id, &body.session_id, &body.tool_name)
        .await
    {
        Ok(()) => Ok(Json(OkBody::OK)),
        Err(e) => already_resolved_is_ok(e),
    }
}

async fn session_reset(
    State(service): State<Arc<ApprovalService>>,
    Json(body): Json<SessionBody>,
) -> Result<Json<OkBody>, ApiError> {
    if body.session_id.is_empty() {
        return Err(ApiError::bad_request("Missing session_id"));
    }
    let source = body.source.as_deref().unwrap_or("unknown");
    service.reset_session(&body.session_id, source).await?;
    Ok(Json(OkBody::OK))
}

async fn session_end(
    State(service): State<Arc<ApprovalService>>,
    Json(body): Json<SessionBody>,
) -> Result<Json<OkBody>, ApiError> {
    if body.session_id.is_empty() {
        return Err(ApiError::bad_request("Missing session_id"));
    }
    service.end_session(&body.session_id).await?;
    Ok(Json(OkBody::OK))
}

async fn submit_prompt(
    State(service): State<Arc<ApprovalService>>,
    Json(body): Json<PromptBody>,
) -> Result<Json<OkBody>, ApiError> {
    match service.submit_prompt(&body.id, &body.prompt).await {
        Ok(()) => Ok(Json(OkBody::OK)),
        Err(e) => already_resolved_is_ok(e),
    }
}

async fn dismiss_prompt(
    State(service): State<Arc<ApprovalService>>,
    Json(body): Json<DismissBody>,
) -> Result<Json<OkBody>, ApiError> {
    match service.dismiss_prompt(&body.id).await {
        Ok(()) => Ok(Json(OkBody::OK)),
        Err(e) => already_resolved_is_ok(e),
    }
}

/// A resolution race means the outcome the caller wanted already exists;
/// report success rather than making the UI surface a spurious error.
fn already_resolved_is_ok(e: Error) -> Result<Json<OkBody>, ApiError> {
    if let Error::AlreadyResolved { id } = &e {
        debug!(id, "Entry already resolved; treating as success");
        return Ok(Json(OkBody::OK));
    }
    Err(ApiError::from(e))
}

/// Core errors rendered as JSON HTTP responses.
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: &str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.to_string(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        let status = match &e {
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::InvalidId { .. } => StatusCode::BAD_REQUEST,
            Error::ToolUnavailable { .. } | Error::Injection(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorBody {
            error: String,
        }
        (
            self.status,
            Json(ErrorBody {
                error: self.message,
            }),
        )
            .into_response()
    }
}
