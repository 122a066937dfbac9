use serde::Serialize;

/// Structured trace events emitted across the agent workspace crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    SessionCreated {
        agent_id: String,
        /// `None` while the engine has not yet assigned an id (staging).
        session_id: Option<String>,
        resumed: bool,
    },
    SessionConfirmed {
        agent_id: String,
        session_id: String,
    },
    SessionIdReplaced {
        agent_id: String,
        old_session_id: String,
        new_session_id: String,
    },
    SessionRemoved {
        agent_id: String,
        session_id: String,
        reason: String,
    },
    StagingExpired {
        agent_id: String,
        age_secs: i64,
    },
    SessionEvicted {
        agent_id: String,
        session_id: Option<String>,
        idle_secs: i64,
    },
    TurnCompleted {
        agent_id: String,
        session_id: Option<String>,
        request_id: u64,
        outcome: String,
        duration_ms: u64,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "aw_event");
    }
}
