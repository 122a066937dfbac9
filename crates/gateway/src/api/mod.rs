pub mod agents;
pub mod chat;
pub mod health;
pub mod sessions;

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;

use crate::runtime::TurnError;
use crate::state::AppState;

/// Build the full API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        // Agents
        .route("/v1/agents", get(agents::list_agents))
        .route("/v1/agents/:id/sessions/latest", get(agents::latest_session))
        // Chat (core runtime)
        .route("/v1/chat", post(chat::chat))
        .route("/v1/chat/stream", post(chat::chat_stream))
        // Live sessions
        .route("/v1/sessions", get(sessions::list_sessions))
        .route(
            "/v1/sessions/:id",
            get(sessions::get_session).delete(sessions::delete_session),
        )
        .route("/v1/sessions/:id/interrupt", post(sessions::interrupt_session))
}

/// Build a standardized JSON error response: `{ "error": "<message>" }`.
pub(crate) fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

impl IntoResponse for TurnError {
    fn into_response(self) -> Response {
        let status = match &self {
            TurnError::UnknownAgent(_) => StatusCode::NOT_FOUND,
            TurnError::AgentMismatch { .. } => StatusCode::CONFLICT,
            TurnError::Busy => {
                let mut resp = api_error(StatusCode::TOO_MANY_REQUESTS, self.to_string());
                resp.headers_mut()
                    .insert(header::RETRY_AFTER, header::HeaderValue::from_static("1"));
                return resp;
            }
            TurnError::Inactive => StatusCode::SERVICE_UNAVAILABLE,
            TurnError::Connect(_) | TurnError::Engine(_) => StatusCode::BAD_GATEWAY,
        };
        api_error(status, self.to_string())
    }
}
