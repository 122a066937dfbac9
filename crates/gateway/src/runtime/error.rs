use aw_engine::EngineError;
use aw_sessions::SessionError;

/// Why a turn could not be started.
#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    #[error("session {session_id} belongs to agent {owner}")]
    AgentMismatch { session_id: String, owner: String },

    #[error("session busy: a turn is already in flight")]
    Busy,

    #[error("session not active")]
    Inactive,

    #[error("failed to start engine: {0}")]
    Connect(#[source] EngineError),

    #[error("engine error: {0}")]
    Engine(String),
}

impl From<SessionError> for TurnError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Busy => Self::Busy,
            SessionError::Inactive => Self::Inactive,
            SessionError::Connect(e) => Self::Connect(e),
            other => Self::Engine(other.to_string()),
        }
    }
}
