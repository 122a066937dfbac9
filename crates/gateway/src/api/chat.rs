//! Chat API endpoints: the primary interface for running agent turns.
//!
//! - `POST /v1/chat`: non-streaming, returns the aggregated reply
//! - `POST /v1/chat/stream`: SSE, one event per engine event

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use futures_util::stream::Stream;
use serde::Deserialize;

use aw_domain::EngineEvent;

use crate::runtime::{assistant_text, start_turn, ChatEvent, TurnRequest, TurnStarted};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request shape
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// Agent whose engine options drive the conversation.
    pub agent_id: String,
    /// User message text.
    pub message: String,
    /// Continue (or resume) this conversation.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Without `session_id`: continue the agent's latest conversation.
    #[serde(default)]
    pub continue_latest: bool,
}

impl From<ChatRequest> for TurnRequest {
    fn from(body: ChatRequest) -> Self {
        Self {
            agent_id: body.agent_id,
            message: body.message,
            session_id: body.session_id,
            continue_latest: body.continue_latest,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/chat (non-streaming)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn chat(State(state): State<AppState>, Json(body): Json<ChatRequest>) -> Response {
    let mut started = match start_turn(&state, body.into()).await {
        Ok(s) => s,
        Err(e) => return e.into_response(),
    };

    let mut session_id = started.session_id.clone();
    let mut text = String::new();
    let mut result = None;
    let mut is_error = false;
    let mut usage = None;
    let mut errors = Vec::new();

    while let Some(event) = started.events.recv().await {
        match event {
            ChatEvent::Session { session_id: id } => session_id = Some(id),
            ChatEvent::Engine(EngineEvent::Assistant { message, .. }) => {
                text.push_str(&assistant_text(&message));
            }
            ChatEvent::Engine(EngineEvent::Result {
                result: r,
                is_error: e,
                usage: u,
                ..
            }) => {
                result = r;
                is_error = e;
                usage = u;
            }
            ChatEvent::Engine(_) => { /* bookkeeping, ignored in non-streaming */ }
            ChatEvent::Error { message } => errors.push(message),
        }
    }

    Json(serde_json::json!({
        "agent_id": started.agent_id,
        "session_id": session_id,
        "content": result.unwrap_or(text),
        "is_error": is_error || !errors.is_empty(),
        "retried": started.retried,
        "usage": usage,
        "errors": errors,
    }))
    .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/chat/stream (SSE)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Failures before the turn starts are plain JSON errors with the usual
/// status codes; once accepted, everything arrives as SSE events.
pub async fn chat_stream(
    State(state): State<AppState>,
    Json(body): Json<ChatRequest>,
) -> Response {
    match start_turn(&state, body.into()).await {
        Ok(started) => Sse::new(make_sse_stream(started))
            .keep_alive(KeepAlive::default())
            .into_response(),
        Err(e) => e.into_response(),
    }
}

fn make_sse_stream(
    mut started: TurnStarted,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    async_stream::stream! {
        if let Some(id) = started.session_id.take() {
            let opening = ChatEvent::Session { session_id: id };
            yield Ok(Event::default().event(opening.name()).data(opening.data().to_string()));
        }
        while let Some(event) = started.events.recv().await {
            yield Ok(Event::default().event(event.name()).data(event.data().to_string()));
        }
        // Dropping the receiver here lets the forwarder cancel the request
        // if the client disconnected mid-turn.
    }
}
