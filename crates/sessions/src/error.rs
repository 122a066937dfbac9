use aw_engine::EngineError;

/// Errors surfaced by [`ConversationSession`](crate::ConversationSession)
/// entry points.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The session was closed or its stream failed.  Not retryable on the
    /// same session.
    #[error("session not active")]
    Inactive,

    /// Another turn is in flight.  Retry after it resolves.
    #[error("session busy: a turn is already in flight")]
    Busy,

    #[error("engine does not support interrupt")]
    InterruptUnsupported,

    #[error("failed to establish engine stream: {0}")]
    Connect(#[source] EngineError),

    #[error("engine error: {0}")]
    Engine(#[source] EngineError),
}

impl SessionError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Busy)
    }
}
