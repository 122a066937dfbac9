//! Conversation session: one persistent engine stream shared by many
//! sequential callers.
//!
//! Callers submit turns with [`ConversationSession::send`] and read the
//! engine's reply from the returned [`TurnHandle`].  A single background
//! dispatch task per session reads the engine's output in order and routes
//! each event to the oldest pending request.  At most one turn is in flight
//! at a time.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use aw_domain::{EngineEvent, Turn};
use aw_engine::{ConversationEngine, EngineControl, EngineOptions, EventStream};

use crate::error::SessionError;
use crate::queue::{self, TurnQueue};

/// Identifier of one request against a session.  Unique per session.
pub type RequestId = u64;

struct PendingRequest {
    id: RequestId,
    tx: mpsc::UnboundedSender<EngineEvent>,
}

pub struct ConversationSession {
    agent_id: String,
    created_at: DateTime<Utc>,
    session_id: RwLock<Option<String>>,
    active: AtomicBool,
    closed: AtomicBool,
    processing: AtomicBool,
    last_activity: Mutex<DateTime<Utc>>,
    pending: Mutex<VecDeque<PendingRequest>>,
    next_request: AtomicU64,
    queue: TurnQueue,
    control: Arc<dyn EngineControl>,
    /// Engine output, parked here until the dispatch task takes it.
    events: Mutex<Option<EventStream>>,
    dispatch: Mutex<Option<JoinHandle<()>>>,
    close_grace: Duration,
}

impl ConversationSession {
    /// Open the engine stream for a conversation.
    ///
    /// The stream is established eagerly.  A resumption hint in `options`
    /// becomes the initial session id.
    pub async fn connect(
        engine: &dyn ConversationEngine,
        options: EngineOptions,
        close_grace: Duration,
    ) -> Result<Arc<Self>, SessionError> {
        let (queue, turns) = queue::channel();
        let agent_id = options.agent_id.clone();
        let session_id = options.resume.clone();

        let conn = engine
            .connect(options, Box::pin(turns))
            .await
            .map_err(|e| {
                tracing::warn!(agent_id = %agent_id, error = %e, "engine stream rejected");
                SessionError::Connect(e)
            })?;

        let now = Utc::now();
        Ok(Arc::new(Self {
            agent_id,
            created_at: now,
            session_id: RwLock::new(session_id),
            active: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            processing: AtomicBool::new(false),
            last_activity: Mutex::new(now),
            pending: Mutex::new(VecDeque::new()),
            next_request: AtomicU64::new(1),
            queue,
            control: conn.control,
            events: Mutex::new(Some(conn.events)),
            dispatch: Mutex::new(None),
            close_grace,
        }))
    }

    // ── accessors ──────────────────────────────────────────────────

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        *self.last_activity.lock()
    }

    pub fn pending_requests(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn supports_interrupt(&self) -> bool {
        self.control.supports_interrupt()
    }

    /// Time since the last send or received event.
    pub fn idle_for(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_activity()).to_std().unwrap_or(Duration::ZERO)
    }

    /// Time since the session was created.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.created_at).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn is_idle(&self, timeout: Duration) -> bool {
        self.is_idle_at(Utc::now(), timeout)
    }

    pub fn is_idle_at(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        self.idle_for(now) > timeout
    }

    pub(crate) fn set_session_id(&self, session_id: &str) {
        *self.session_id.write() = Some(session_id.to_owned());
    }

    fn touch(&self) {
        *self.last_activity.lock() = Utc::now();
    }

    // ── operations ─────────────────────────────────────────────────

    /// Submit a turn.
    ///
    /// Fails with [`SessionError::Busy`] while another turn is in flight and
    /// with [`SessionError::Inactive`] once the session is closed or its
    /// stream has failed.  Neither failure touches the turn queue.
    pub fn send(self: &Arc<Self>, turn: Turn) -> Result<TurnHandle, SessionError> {
        if !self.is_active() {
            return Err(SessionError::Inactive);
        }
        if self
            .processing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SessionError::Busy);
        }

        let id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.touch();
        self.pending.lock().push_back(PendingRequest { id, tx });

        if !self.queue.push(turn) {
            // Closed between the activity check and the push.
            self.pending.lock().retain(|p| p.id != id);
            self.processing.store(false, Ordering::SeqCst);
            return Err(SessionError::Inactive);
        }

        tracing::debug!(
            agent_id = %self.agent_id,
            session_id = ?self.session_id(),
            request_id = id,
            "turn queued"
        );
        self.ensure_dispatch();
        Ok(TurnHandle { id, rx })
    }

    /// Stop routing events to a request without touching the engine-side
    /// turn.  Returns whether the request was still pending.
    pub fn cancel_request(&self, id: RequestId) -> bool {
        let mut pending = self.pending.lock();
        let before = pending.len();
        pending.retain(|p| p.id != id);
        let removed = pending.len() != before;
        if removed {
            tracing::debug!(agent_id = %self.agent_id, request_id = id, "request cancelled");
        }
        removed
    }

    /// Ask the engine to abandon the current turn.  The terminal event for
    /// that turn still arrives through the normal dispatch path.  With no
    /// turn in flight this is a no-op, so it cannot hit a later turn.
    pub async fn interrupt(&self) -> Result<(), SessionError> {
        if !self.is_active() {
            return Err(SessionError::Inactive);
        }
        if !self.control.supports_interrupt() {
            return Err(SessionError::InterruptUnsupported);
        }
        if !self.is_processing() {
            tracing::debug!(agent_id = %self.agent_id, session_id = ?self.session_id(), "no turn to interrupt");
            return Ok(());
        }
        tracing::debug!(agent_id = %self.agent_id, session_id = ?self.session_id(), "interrupting turn");
        self.control.interrupt().await.map_err(SessionError::Engine)
    }

    /// Close the session.  Pending requests are dropped without a terminal
    /// event and the engine gets the configured grace period to exit.
    /// Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.active.store(false, Ordering::SeqCst);
        self.processing.store(false, Ordering::SeqCst);
        self.pending.lock().clear();
        self.queue.end();

        // Claim the dispatch slot before yielding; ensure_dispatch refuses
        // to spawn once `closed` is set.
        let task = self.dispatch.lock().take();
        let events = self.events.lock().take();

        self.control.shutdown(self.close_grace).await;

        if let Some(task) = task {
            task.abort();
        }
        drop(events);
        tracing::debug!(agent_id = %self.agent_id, session_id = ?self.session_id(), "session closed");
    }

    /// Start the dispatch task on first use.  Never spawns after close.
    fn ensure_dispatch(self: &Arc<Self>) {
        let mut slot = self.dispatch.lock();
        if slot.is_some() || self.closed.load(Ordering::SeqCst) {
            return;
        }
        let Some(events) = self.events.lock().take() else {
            return;
        };
        *slot = Some(tokio::spawn(dispatch_loop(Arc::downgrade(self), events)));
    }

    /// Route one engine event to the oldest pending request.
    fn route(&self, event: EngineEvent) {
        self.touch();

        if let Some(id) = event.init_session_id() {
            let mut current = self.session_id.write();
            if current.is_none() {
                tracing::debug!(agent_id = %self.agent_id, session_id = %id, "engine assigned session id");
                *current = Some(id.to_owned());
            }
        }

        if event.is_terminal() {
            // Release single-flight before the caller sees the terminal event.
            let front = self.pending.lock().pop_front();
            self.processing.store(false, Ordering::SeqCst);
            if let Some(req) = front {
                let _ = req.tx.send(event);
            }
        } else if let Some(req) = self.pending.lock().front() {
            let _ = req.tx.send(event);
        }
    }

    /// Stream failure or end: the session can never be used again.
    fn fail(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.processing.store(false, Ordering::SeqCst);
        self.pending.lock().clear();
        self.queue.end();
    }

    pub(crate) fn summary(&self, staging: bool) -> SessionSummary {
        SessionSummary {
            agent_id: self.agent_id.clone(),
            session_id: self.session_id(),
            staging,
            active: self.is_active(),
            processing: self.is_processing(),
            pending_requests: self.pending_requests(),
            created_at: self.created_at,
            last_activity: self.last_activity(),
        }
    }
}

async fn dispatch_loop(session: Weak<ConversationSession>, mut events: EventStream) {
    while let Some(item) = events.next().await {
        let Some(session) = session.upgrade() else {
            return;
        };
        match item {
            Ok(event) => session.route(event),
            Err(e) => {
                tracing::warn!(
                    agent_id = %session.agent_id,
                    session_id = ?session.session_id(),
                    error = %e,
                    "engine stream failed"
                );
                session.fail();
                return;
            }
        }
    }

    if let Some(session) = session.upgrade() {
        if session.is_active() {
            tracing::info!(
                agent_id = %session.agent_id,
                session_id = ?session.session_id(),
                "engine stream ended"
            );
        }
        session.fail();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn handle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The caller's view of one submitted turn.
///
/// Yields the engine's events for the turn in order.  The stream ends right
/// after the terminal event; ending without one means the request was
/// cancelled or the session went away.
pub struct TurnHandle {
    id: RequestId,
    rx: mpsc::UnboundedReceiver<EngineEvent>,
}

impl TurnHandle {
    pub fn id(&self) -> RequestId {
        self.id
    }

    pub async fn next_event(&mut self) -> Option<EngineEvent> {
        self.rx.recv().await
    }
}

impl futures_core::Stream for TurnHandle {
    type Item = EngineEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<EngineEvent>> {
        self.rx.poll_recv(cx)
    }
}

/// Point-in-time view of a session for listings.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub agent_id: String,
    pub session_id: Option<String>,
    pub staging: bool,
    pub active: bool,
    pub processing: bool,
    pub pending_requests: usize,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{next_remote, ScriptedEngine};
    use std::sync::atomic::Ordering;

    const GRACE: Duration = Duration::from_millis(10);

    async fn open(engine: &ScriptedEngine, resume: Option<&str>) -> Arc<ConversationSession> {
        let options = EngineOptions::new("a1").with_resume(resume.map(str::to_owned));
        ConversationSession::connect(engine, options, GRACE).await.unwrap()
    }

    #[tokio::test]
    async fn connect_is_eager_and_adopts_resume_id() {
        let (engine, mut remotes) = ScriptedEngine::new();
        let session = open(&engine, Some("sess-0")).await;
        let remote = next_remote(&mut remotes).await;
        assert_eq!(remote.options.resume.as_deref(), Some("sess-0"));
        assert_eq!(session.session_id().as_deref(), Some("sess-0"));
        assert!(session.is_active());
        assert!(!session.is_processing());
    }

    #[tokio::test]
    async fn rejected_stream_fails_construction() {
        let (engine, _remotes) = ScriptedEngine::new();
        engine.fail_connect.store(true, Ordering::SeqCst);
        let err = ConversationSession::connect(engine.as_ref(), EngineOptions::new("a1"), GRACE)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SessionError::Connect(_)));
    }

    #[tokio::test]
    async fn events_route_to_caller_and_terminal_releases_single_flight() {
        let (engine, mut remotes) = ScriptedEngine::new();
        let session = open(&engine, None).await;
        let mut remote = next_remote(&mut remotes).await;

        let mut h1 = session.send(Turn::user("hello")).unwrap();
        assert!(session.is_processing());
        assert_eq!(remote.next_turn().await.unwrap().text, "hello");

        remote.init("sess-1");
        remote.say("hi");
        remote.finish();

        assert_eq!(h1.next_event().await.unwrap().init_session_id(), Some("sess-1"));
        assert!(matches!(h1.next_event().await, Some(EngineEvent::Assistant { .. })));
        assert!(h1.next_event().await.unwrap().is_terminal());
        assert!(!session.is_processing());
        assert!(h1.next_event().await.is_none());
        assert_eq!(session.session_id().as_deref(), Some("sess-1"));

        let h2 = session.send(Turn::user("world")).unwrap();
        assert_ne!(h1.id(), h2.id());
        assert_eq!(remote.next_turn().await.unwrap().text, "world");
    }

    #[tokio::test]
    async fn second_send_while_busy_is_rejected_without_queueing() {
        let (engine, mut remotes) = ScriptedEngine::new();
        let session = open(&engine, None).await;
        let mut remote = next_remote(&mut remotes).await;

        let mut h1 = session.send(Turn::user("first")).unwrap();
        assert!(matches!(session.send(Turn::user("second")), Err(SessionError::Busy)));
        assert_eq!(remote.next_turn().await.unwrap().text, "first");
        assert!(remote.next_turn().await.is_none());

        remote.finish();
        assert!(h1.next_event().await.unwrap().is_terminal());

        session.send(Turn::user("second")).unwrap();
        assert_eq!(remote.next_turn().await.unwrap().text, "second");
    }

    #[tokio::test]
    async fn init_does_not_override_known_id() {
        let (engine, mut remotes) = ScriptedEngine::new();
        let session = open(&engine, Some("sess-0")).await;
        let remote = next_remote(&mut remotes).await;

        let mut h = session.send(Turn::user("x")).unwrap();
        remote.init("sess-fork");
        assert_eq!(h.next_event().await.unwrap().init_session_id(), Some("sess-fork"));
        assert_eq!(session.session_id().as_deref(), Some("sess-0"));
    }

    #[tokio::test]
    async fn stream_error_mid_turn_makes_session_inactive() {
        let (engine, mut remotes) = ScriptedEngine::new();
        let session = open(&engine, None).await;
        let remote = next_remote(&mut remotes).await;

        let mut h = session.send(Turn::user("hello")).unwrap();
        remote.say("partial");
        remote.fail();

        assert!(matches!(h.next_event().await, Some(EngineEvent::Assistant { .. })));
        assert!(h.next_event().await.is_none());
        assert!(!session.is_active());
        assert!(!session.is_processing());
        assert!(matches!(session.send(Turn::user("again")), Err(SessionError::Inactive)));
    }

    #[tokio::test]
    async fn stream_end_makes_session_inactive() {
        let (engine, mut remotes) = ScriptedEngine::new();
        let session = open(&engine, None).await;
        let remote = next_remote(&mut remotes).await;

        let mut h = session.send(Turn::user("hello")).unwrap();
        drop(remote);
        assert!(h.next_event().await.is_none());
        assert!(!session.is_active());
    }

    #[tokio::test]
    async fn close_drops_pending_without_delivery() {
        let (engine, mut remotes) = ScriptedEngine::new();
        let session = open(&engine, None).await;
        let mut remote = next_remote(&mut remotes).await;

        let mut h = session.send(Turn::user("hello")).unwrap();
        session.close().await;
        remote.say("too late");
        remote.finish();

        assert!(h.next_event().await.is_none());
        assert!(!session.is_active());
        assert_eq!(session.pending_requests(), 0);
        assert!(matches!(session.send(Turn::user("again")), Err(SessionError::Inactive)));

        // Turn queue was ended: the engine sees end-of-input after the turn.
        assert_eq!(remote.next_turn().await.unwrap().text, "hello");
        assert!(remote.next_turn().await.is_none());

        session.close().await;
        assert_eq!(remote.stats.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_request_stops_receiving_but_terminal_still_releases() {
        let (engine, mut remotes) = ScriptedEngine::new();
        let session = open(&engine, None).await;
        let remote = next_remote(&mut remotes).await;

        let mut h = session.send(Turn::user("hello")).unwrap();
        assert!(session.cancel_request(h.id()));
        assert!(!session.cancel_request(h.id()));
        assert!(h.next_event().await.is_none());
        assert!(session.is_processing());

        remote.finish();
        // Wait for the dispatch task to route the terminal event.
        for _ in 0..100 {
            if !session.is_processing() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(!session.is_processing());
        assert!(session.is_active());
    }

    #[tokio::test]
    async fn close_during_send_leaves_no_dispatch_task() {
        let (engine, mut remotes) = ScriptedEngine::new();
        let session = open(&engine, None).await;
        let _remote = next_remote(&mut remotes).await;

        let _h = session.send(Turn::user("hello")).unwrap();
        assert!(session.dispatch.lock().is_some());
        session.close().await;
        assert!(session.dispatch.lock().is_none());
        assert!(session.events.lock().is_none());

        // A send that passed its activity check before close must not
        // start a task that would outlive the session.
        let (engine, mut remotes) = ScriptedEngine::new();
        let session = open(&engine, None).await;
        let _remote = next_remote(&mut remotes).await;
        session.close().await;
        session.ensure_dispatch();
        assert!(session.dispatch.lock().is_none());
    }

    #[tokio::test]
    async fn interrupt_forwards_to_engine() {
        let (engine, mut remotes) = ScriptedEngine::new();
        let session = open(&engine, None).await;
        let remote = next_remote(&mut remotes).await;

        // Idle: nothing to interrupt.
        session.interrupt().await.unwrap();
        assert_eq!(remote.stats.interrupts.load(Ordering::SeqCst), 0);

        let _h = session.send(Turn::user("long task")).unwrap();
        session.interrupt().await.unwrap();
        assert_eq!(remote.stats.interrupts.load(Ordering::SeqCst), 1);

        session.close().await;
        assert!(matches!(session.interrupt().await, Err(SessionError::Inactive)));
    }

    #[tokio::test]
    async fn interrupt_right_after_send_resolves_the_turn() {
        let engine = aw_engine::EchoEngine::new(Duration::from_secs(30));
        let session = ConversationSession::connect(&engine, EngineOptions::new("a1"), GRACE)
            .await
            .unwrap();

        let mut h = session.send(Turn::user("slow")).unwrap();
        session.interrupt().await.unwrap();

        let terminal = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let event = h.next_event().await.expect("terminal event");
                if event.is_terminal() {
                    return event;
                }
            }
        })
        .await
        .expect("interrupted turn resolves before the delay");
        match terminal {
            EngineEvent::Result { is_error, result, .. } => {
                assert!(is_error);
                assert_eq!(result.as_deref(), Some("interrupted"));
            }
            other => panic!("expected result, got {other:?}"),
        }
        assert!(!session.is_processing());
        session.close().await;
    }

    #[tokio::test]
    async fn interrupt_unsupported() {
        let (engine, mut remotes) = ScriptedEngine::without_interrupt();
        let session = open(&engine, None).await;
        let _remote = next_remote(&mut remotes).await;
        assert!(matches!(
            session.interrupt().await,
            Err(SessionError::InterruptUnsupported)
        ));
    }

    #[tokio::test]
    async fn idle_is_measured_from_last_activity() {
        let (engine, _remotes) = ScriptedEngine::new();
        let session = open(&engine, None).await;
        let now = session.last_activity();
        let timeout = Duration::from_secs(60);
        assert!(!session.is_idle_at(now + chrono::Duration::seconds(60), timeout));
        assert!(session.is_idle_at(now + chrono::Duration::seconds(61), timeout));
        assert!(!session.is_idle(timeout));
    }
}
