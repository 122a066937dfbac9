//! Scripted engine for driving sessions from tests.
//!
//! Every `connect` hands a [`Remote`] to the test, which then plays the
//! engine: it reads the turns the session pushed and emits events (or a
//! stream failure) at will.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc;

use aw_domain::{BoxStream, EngineEvent, Turn};
use aw_engine::{ConversationEngine, EngineConnection, EngineControl, EngineError, EngineOptions};

pub(crate) struct ScriptedEngine {
    remotes: mpsc::UnboundedSender<Remote>,
    interruptible: bool,
    pub(crate) fail_connect: AtomicBool,
}

impl ScriptedEngine {
    pub(crate) fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Remote>) {
        Self::build(true)
    }

    pub(crate) fn without_interrupt() -> (Arc<Self>, mpsc::UnboundedReceiver<Remote>) {
        Self::build(false)
    }

    fn build(interruptible: bool) -> (Arc<Self>, mpsc::UnboundedReceiver<Remote>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = Self {
            remotes: tx,
            interruptible,
            fail_connect: AtomicBool::new(false),
        };
        (Arc::new(engine), rx)
    }
}

#[async_trait]
impl ConversationEngine for ScriptedEngine {
    async fn connect(
        &self,
        options: EngineOptions,
        turns: BoxStream<'static, Turn>,
    ) -> Result<EngineConnection, EngineError> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(EngineError::Rejected("scripted failure".into()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let stats = Arc::new(ControlStats::default());
        let _ = self.remotes.send(Remote {
            options,
            turns,
            events: tx,
            stats: Arc::clone(&stats),
        });
        let events = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(EngineConnection {
            events: Box::pin(events),
            control: Arc::new(ScriptedControl {
                stats,
                interruptible: self.interruptible,
            }),
        })
    }
}

#[derive(Default)]
pub(crate) struct ControlStats {
    pub(crate) interrupts: AtomicUsize,
    pub(crate) shutdowns: AtomicUsize,
}

struct ScriptedControl {
    stats: Arc<ControlStats>,
    interruptible: bool,
}

#[async_trait]
impl EngineControl for ScriptedControl {
    fn supports_interrupt(&self) -> bool {
        self.interruptible
    }

    async fn interrupt(&self) -> Result<(), EngineError> {
        self.stats.interrupts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn shutdown(&self, _grace: Duration) {
        self.stats.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

/// The test's end of one engine stream.
pub(crate) struct Remote {
    pub(crate) options: EngineOptions,
    pub(crate) turns: BoxStream<'static, Turn>,
    pub(crate) events: mpsc::UnboundedSender<Result<EngineEvent, EngineError>>,
    pub(crate) stats: Arc<ControlStats>,
}

impl Remote {
    pub(crate) fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(Ok(event));
    }

    pub(crate) fn init(&self, session_id: &str) {
        self.emit(EngineEvent::init(session_id));
    }

    pub(crate) fn say(&self, text: &str) {
        self.emit(EngineEvent::Assistant {
            session_id: None,
            message: serde_json::json!({ "role": "assistant", "content": text }),
        });
    }

    pub(crate) fn finish(&self) {
        self.emit(result_event());
    }

    pub(crate) fn fail(&self) {
        let _ = self.events.send(Err(EngineError::ProcessExited));
    }

    /// Next turn pushed by the session, or `None` if none arrives quickly.
    pub(crate) async fn next_turn(&mut self) -> Option<Turn> {
        tokio::time::timeout(Duration::from_millis(100), self.turns.next())
            .await
            .ok()
            .flatten()
    }
}

pub(crate) fn result_event() -> EngineEvent {
    EngineEvent::Result {
        subtype: "success".into(),
        session_id: None,
        is_error: false,
        result: Some("done".into()),
        duration_ms: Some(1),
        usage: None,
    }
}

/// Wait for the next remote handed out by the engine.
pub(crate) async fn next_remote(rx: &mut mpsc::UnboundedReceiver<Remote>) -> Remote {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .ok()
        .flatten()
        .expect("engine was not connected")
}
