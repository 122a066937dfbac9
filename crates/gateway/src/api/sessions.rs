//! Live-session endpoints.
//!
//! These expose the in-memory session registry: listing, inspection,
//! interrupting an in-flight turn and closing a conversation.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};

use aw_sessions::SessionError;

use super::api_error;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Every live session (confirmed and staging), most recently active first.
pub async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    let sessions = state.registry.list();
    Json(serde_json::json!({
        "count": sessions.len(),
        "sessions": sessions,
    }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/sessions/:id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.registry.describe(&id) {
        Some(summary) => Json(summary).into_response(),
        None => api_error(StatusCode::NOT_FOUND, format!("session not found: {id}")),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/sessions/:id/interrupt
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Ask the engine to abandon the in-flight turn.  The turn itself still
/// ends with the engine's terminal event, delivered to its original caller.
pub async fn interrupt_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    let Some(session) = state.registry.get_session(&id) else {
        return api_error(StatusCode::NOT_FOUND, format!("session not found: {id}"));
    };

    match session.interrupt().await {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({
                "session_id": id,
                "interrupted": true,
                "processing": session.is_processing(),
            })),
        )
            .into_response(),
        Err(e @ SessionError::Inactive) => api_error(StatusCode::CONFLICT, e.to_string()),
        Err(e @ SessionError::InterruptUnsupported) => {
            api_error(StatusCode::NOT_IMPLEMENTED, e.to_string())
        }
        Err(e) => {
            tracing::warn!(session_id = %id, error = %e, "interrupt failed");
            api_error(StatusCode::BAD_GATEWAY, e.to_string())
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DELETE /v1/sessions/:id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Close the session and drop it from the registry.  Callers waiting on
/// a turn see their stream end.
pub async fn delete_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    if state.registry.remove_session(&id).await {
        Json(serde_json::json!({ "session_id": id, "removed": true })).into_response()
    } else {
        api_error(StatusCode::NOT_FOUND, format!("session not found: {id}"))
    }
}
