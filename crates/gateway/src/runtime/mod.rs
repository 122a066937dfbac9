//! Turn runtime: acquires a session for a request, submits the turn and
//! forwards the engine's reply to the caller.
//!
//! Entry point: [`start_turn`] resolves the agent, finds or creates the
//! conversation, and returns a channel of [`ChatEvent`]s suitable for SSE
//! or non-streaming aggregation.  A session that turns out to be inactive
//! is replaced once by a fresh (resumed) session; a busy session is
//! reported immediately.

mod error;

pub use error::TurnError;

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;

use aw_domain::trace::TraceEvent;
use aw_domain::{EngineEvent, Turn};
use aw_engine::EngineOptions;
use aw_sessions::{
    ConversationSession, NewSession, RequestId, SessionError, SessionRegistry, StagingToken,
    TurnHandle,
};

use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ChatEvent: what the caller receives
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Events emitted to the caller during one turn.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    /// The conversation id became known or changed.
    Session { session_id: String },
    /// Engine output, passed through untouched.
    Engine(EngineEvent),
    /// The turn ended without a terminal engine event.
    Error { message: String },
}

impl ChatEvent {
    /// Event name (used as the SSE `event:` field).
    pub fn name(&self) -> &'static str {
        match self {
            Self::Session { .. } => "session",
            Self::Engine(event) => event.kind(),
            Self::Error { .. } => "error",
        }
    }

    pub fn data(&self) -> serde_json::Value {
        match self {
            Self::Session { session_id } => serde_json::json!({ "session_id": session_id }),
            Self::Engine(event) => serde_json::to_value(event).unwrap_or_default(),
            Self::Error { message } => serde_json::json!({ "error": message }),
        }
    }
}

/// Plain text of an assistant message: either a string `content` or the
/// concatenated `text` blocks of a content array.
pub fn assistant_text(message: &serde_json::Value) -> String {
    match message.get("content") {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Array(blocks)) => blocks
            .iter()
            .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
            .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
            .collect(),
        _ => String::new(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn parameters
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Input to a single turn.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub agent_id: String,
    pub message: String,
    /// Continue (or resume) this conversation.
    pub session_id: Option<String>,
    /// Without `session_id`: continue the agent's most recent conversation
    /// instead of starting a new one.
    pub continue_latest: bool,
}

/// A turn that was accepted by a session.
pub struct TurnStarted {
    pub agent_id: String,
    pub session: Arc<ConversationSession>,
    /// Id the registry knows the conversation by when the turn started.
    /// `None` for a fresh conversation until the engine assigns one.
    pub session_id: Option<String>,
    pub request_id: RequestId,
    /// Whether the first session was inactive and a fresh one was used.
    pub retried: bool,
    pub events: mpsc::Receiver<ChatEvent>,
}

struct Acquired {
    session: Arc<ConversationSession>,
    staging: Option<StagingToken>,
    registered_id: Option<String>,
}

impl From<NewSession> for Acquired {
    fn from(created: NewSession) -> Self {
        let registered_id = match created.staging {
            Some(_) => None,
            None => created.session.session_id(),
        };
        Self {
            session: created.session,
            staging: created.staging,
            registered_id,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// start_turn
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Submit one turn and return the channel its events arrive on.
pub async fn start_turn(state: &AppState, req: TurnRequest) -> Result<TurnStarted, TurnError> {
    let agent = state
        .config
        .agent(&req.agent_id)
        .map_err(|_| TurnError::UnknownAgent(req.agent_id.clone()))?;
    let options = EngineOptions::for_agent(&req.agent_id, agent);

    let acquired = acquire(&state.registry, &req, options.clone()).await?;
    match acquired.session.send(Turn::user(req.message.clone())) {
        Ok(handle) => Ok(spawn_forwarder(state, &req.agent_id, acquired, handle, false)),
        Err(SessionError::Inactive) => {
            let resume = acquired
                .registered_id
                .clone()
                .or_else(|| acquired.session.session_id());
            tracing::info!(
                agent_id = %req.agent_id,
                session_id = ?resume,
                "session inactive, retrying once with a fresh session"
            );
            retire(&state.registry, &acquired).await;

            let acquired: Acquired = state.registry.create_session(options, resume).await?.into();
            let handle = acquired.session.send(Turn::user(req.message))?;
            Ok(spawn_forwarder(state, &req.agent_id, acquired, handle, true))
        }
        Err(e) => Err(e.into()),
    }
}

/// Find the session a request addresses, or create one.
async fn acquire(
    registry: &SessionRegistry,
    req: &TurnRequest,
    options: EngineOptions,
) -> Result<Acquired, TurnError> {
    if let Some(id) = &req.session_id {
        if let Some(session) = registry.get_session(id) {
            if session.agent_id() != req.agent_id {
                return Err(TurnError::AgentMismatch {
                    session_id: id.clone(),
                    owner: session.agent_id().to_owned(),
                });
            }
            return Ok(Acquired {
                session,
                staging: None,
                registered_id: Some(id.clone()),
            });
        }
        tracing::debug!(agent_id = %req.agent_id, session_id = %id, "session not registered, resuming");
        return Ok(registry.create_session(options, Some(id.clone())).await?.into());
    }

    if req.continue_latest {
        if let Some(session) = registry.get_latest_session_for_agent(&req.agent_id) {
            let registered_id = session.session_id();
            return Ok(Acquired {
                session,
                staging: None,
                registered_id,
            });
        }
    }

    Ok(registry.create_session(options, None).await?.into())
}

/// Drop a dead session from the registry before replacing it.
async fn retire(registry: &SessionRegistry, acquired: &Acquired) {
    if let Some(token) = acquired.staging {
        registry.discard_staging(token).await;
        return;
    }
    if let Some(id) = &acquired.registered_id {
        let still_registered = registry
            .get_session(id)
            .is_some_and(|s| Arc::ptr_eq(&s, &acquired.session));
        if still_registered {
            registry.remove_session(id).await;
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Forwarder
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn spawn_forwarder(
    state: &AppState,
    agent_id: &str,
    acquired: Acquired,
    handle: TurnHandle,
    retried: bool,
) -> TurnStarted {
    let (tx, rx) = mpsc::channel::<ChatEvent>(64);
    let request_id = handle.id();
    let started = TurnStarted {
        agent_id: agent_id.to_owned(),
        session: acquired.session.clone(),
        session_id: acquired.registered_id.clone(),
        request_id,
        retried,
        events: rx,
    };

    let forwarder = Forwarder {
        registry: state.registry.clone(),
        agent_id: agent_id.to_owned(),
        session: acquired.session,
        staging: acquired.staging,
        registered_id: acquired.registered_id,
        timeout: state.config.sessions.turn_timeout(),
        tx,
    };
    tokio::spawn(forwarder.run(handle));
    started
}

/// Per-turn task between a session's request handle and the caller.
struct Forwarder {
    registry: Arc<SessionRegistry>,
    agent_id: String,
    session: Arc<ConversationSession>,
    staging: Option<StagingToken>,
    registered_id: Option<String>,
    timeout: std::time::Duration,
    tx: mpsc::Sender<ChatEvent>,
}

impl Forwarder {
    async fn run(mut self, mut handle: TurnHandle) {
        let started = Instant::now();
        let request_id = handle.id();

        let outcome = loop {
            let event = match tokio::time::timeout(self.timeout, handle.next_event()).await {
                Ok(Some(event)) => event,
                Ok(None) => {
                    self.fail("session ended before the turn completed").await;
                    break "session_ended";
                }
                Err(_) => {
                    self.session.cancel_request(request_id);
                    self.fail("timed out waiting for the engine").await;
                    break "timeout";
                }
            };

            if let Some(id) = event.init_session_id() {
                if self.track_session_id(id) {
                    let update = ChatEvent::Session {
                        session_id: id.to_owned(),
                    };
                    if self.tx.send(update).await.is_err() {
                        self.session.cancel_request(request_id);
                        break "client_gone";
                    }
                }
            }

            let terminal = event.is_terminal();
            let is_error = matches!(event, EngineEvent::Result { is_error: true, .. });
            if self.tx.send(ChatEvent::Engine(event)).await.is_err() {
                tracing::debug!(
                    agent_id = %self.agent_id,
                    request_id,
                    "caller went away, cancelling request"
                );
                self.session.cancel_request(request_id);
                break "client_gone";
            }
            if terminal {
                break if is_error { "error" } else { "success" };
            }
        };

        TraceEvent::TurnCompleted {
            agent_id: self.agent_id.clone(),
            session_id: self.registered_id.clone(),
            request_id,
            outcome: outcome.into(),
            duration_ms: started.elapsed().as_millis() as u64,
        }
        .emit();
    }

    /// Keep the registry in step with the engine-assigned id.  Returns
    /// whether the id the caller should use changed.
    fn track_session_id(&mut self, id: &str) -> bool {
        if let Some(token) = self.staging.take() {
            self.registry.confirm_session_id(token, id);
            self.registered_id = Some(id.to_owned());
            return true;
        }
        match self.registered_id.as_deref() {
            Some(old) if old != id => {
                if self.registry.replace_session_id(&self.session, old, id) {
                    self.registered_id = Some(id.to_owned());
                    return true;
                }
                false
            }
            _ => false,
        }
    }

    async fn fail(&self, message: &str) {
        tracing::warn!(
            agent_id = %self.agent_id,
            session_id = ?self.registered_id,
            "{message}"
        );
        let _ = self
            .tx
            .send(ChatEvent::Error {
                message: message.to_owned(),
            })
            .await;
    }
}
