//! Agent endpoints: configured agents and their live conversations.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};

use super::api_error;
use crate::state::AppState;

/// GET /v1/agents: configured agents with their live-session counts.
pub async fn list_agents(State(state): State<AppState>) -> impl IntoResponse {
    let sessions = state.registry.list();
    let agents: Vec<_> = state
        .config
        .agents
        .iter()
        .map(|(id, agent)| {
            let live = sessions.iter().filter(|s| &s.agent_id == id).count();
            serde_json::json!({
                "id": id,
                "description": agent.description,
                "model": agent.model,
                "permission_mode": agent.permission_mode,
                "tools_allow": agent.tools.allow,
                "tools_deny": agent.tools.deny,
                "live_sessions": live,
            })
        })
        .collect();

    Json(serde_json::json!({
        "count": agents.len(),
        "agents": agents,
    }))
}

/// GET /v1/agents/:id/sessions/latest: the agent's most recently active
/// conversation, if any.
pub async fn latest_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    if state.config.agent(&id).is_err() {
        return api_error(StatusCode::NOT_FOUND, format!("unknown agent: {id}"));
    }
    let latest = state
        .registry
        .get_latest_session_for_agent(&id)
        .and_then(|s| s.session_id())
        .and_then(|sid| state.registry.describe(&sid));
    match latest {
        Some(summary) => Json(summary).into_response(),
        None => api_error(
            StatusCode::NOT_FOUND,
            format!("no active session for agent {id}"),
        ),
    }
}
