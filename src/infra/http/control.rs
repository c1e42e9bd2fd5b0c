//! Control surface under `/__waystation`: platform events the engine reacts
//! to, plus the session stream and a status report.

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use crate::engine::{ClickOutcome, HostCommand, NotificationClick, StorageError};
use crate::infra::sessions::sse_response;

use super::HttpState;
use super::error::HttpError;

const SOURCE: &str = "infra::http::control";

pub const CONTROL_PREFIX: &str = "/__waystation";

pub(super) fn router() -> Router<HttpState> {
    Router::new()
        .route("/message", post(message))
        .route("/sync", post(sync))
        .route("/push", post(push))
        .route("/notification-click", post(notification_click))
        .route("/sessions", get(sessions))
        .route("/status", get(status))
}

#[derive(Debug, Serialize)]
struct MessageReply {
    state: &'static str,
    activated: bool,
    pruned: Vec<String>,
}

async fn message(State(state): State<HttpState>, Json(command): Json<HostCommand>) -> Response {
    match state.engine.handle_message(command).await {
        Ok(report) => Json(MessageReply {
            state: state.engine.state().as_str(),
            activated: report.is_some(),
            pruned: report.map(|report| report.pruned).unwrap_or_default(),
        })
        .into_response(),
        Err(err) => HttpError::from_error(
            SOURCE,
            StatusCode::CONFLICT,
            "Lifecycle transition rejected",
            &err,
        )
        .into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct SyncRequest {
    tag: String,
}

#[derive(Debug, Serialize)]
struct SyncReply {
    relayed: bool,
    delivered: usize,
    failed: usize,
}

async fn sync(State(state): State<HttpState>, Json(request): Json<SyncRequest>) -> Json<SyncReply> {
    let reply = match state.engine.handle_sync(&request.tag).await {
        Some(report) => SyncReply {
            relayed: true,
            delivered: report.delivered,
            failed: report.failed,
        },
        None => SyncReply {
            relayed: false,
            delivered: 0,
            failed: 0,
        },
    };
    Json(reply)
}

async fn push(State(state): State<HttpState>, body: Bytes) -> Response {
    let payload = (!body.is_empty()).then_some(body.as_ref());
    match state.engine.handle_push(payload).await {
        Ok(notification) => Json(notification).into_response(),
        Err(err) => HttpError::from_error(
            SOURCE,
            StatusCode::SERVICE_UNAVAILABLE,
            "Notification could not be shown",
            &err,
        )
        .into_response(),
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
enum ClickReply {
    Focused { session: String },
    Opened { url: String },
    Dismissed,
}

async fn notification_click(
    State(state): State<HttpState>,
    Json(click): Json<NotificationClick>,
) -> Response {
    match state.engine.handle_notification_click(&click).await {
        Ok(outcome) => {
            let reply = match outcome {
                ClickOutcome::Focused(session) => ClickReply::Focused {
                    session: session.to_string(),
                },
                ClickOutcome::Opened(url) => ClickReply::Opened { url },
                ClickOutcome::Dismissed => ClickReply::Dismissed,
            };
            Json(reply).into_response()
        }
        Err(err) => HttpError::from_error(
            SOURCE,
            StatusCode::SERVICE_UNAVAILABLE,
            "No session could handle the click",
            &err,
        )
        .into_response(),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SessionQuery {
    url: Option<String>,
}

async fn sessions(State(state): State<HttpState>, Query(query): Query<SessionQuery>) -> Response {
    sse_response(state.sessions.clone(), query.url)
}

#[derive(Debug, Serialize)]
struct StatusReply {
    state: &'static str,
    current: Vec<String>,
    stored: Vec<String>,
    sessions: usize,
}

async fn status(State(state): State<HttpState>) -> Result<Json<StatusReply>, HttpError> {
    let stored = state
        .engine
        .storage()
        .namespaces()
        .await
        .map_err(|err: StorageError| {
            HttpError::from_error(
                SOURCE,
                StatusCode::SERVICE_UNAVAILABLE,
                "Cache storage unavailable",
                &err,
            )
        })?;

    Ok(Json(StatusReply {
        state: state.engine.state().as_str(),
        current: state
            .engine
            .namespaces()
            .current_identifiers()
            .iter()
            .map(|id| id.to_string())
            .collect(),
        stored,
        sessions: state.sessions.len(),
    }))
}
