//! In-process engine that answers each turn by echoing it back.
//!
//! For every turn it emits `system/init`, one `assistant` message and a
//! `result`.  A configurable delay sits before the reply; an interrupt
//! during the delay resolves the turn with an error result instead.  An
//! interrupt that lands before the engine has picked the turn up still
//! applies to that turn, and is forgotten once the turn resolves.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::json;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

use aw_domain::{BoxStream, EngineEvent, Turn, Usage};

use crate::engine::{ConversationEngine, EngineConnection, EngineControl, EngineError, EventStream};
use crate::options::EngineOptions;

pub struct EchoEngine {
    delay: Duration,
}

impl EchoEngine {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl ConversationEngine for EchoEngine {
    async fn connect(
        &self,
        options: EngineOptions,
        turns: BoxStream<'static, Turn>,
    ) -> Result<EngineConnection, EngineError> {
        let session_id = options
            .resume
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let interrupt = Arc::new(Interrupt::default());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(run(
            session_id,
            self.delay,
            turns,
            tx,
            Arc::clone(&interrupt),
        ));

        let events: EventStream = Box::pin(async_stream::stream! {
            while let Some(event) = rx.recv().await {
                yield Ok(event);
            }
        });

        Ok(EngineConnection {
            events,
            control: Arc::new(EchoControl {
                interrupt,
                task: parking_lot::Mutex::new(Some(task)),
            }),
        })
    }
}

/// Interrupt request for the turn in flight, or the next one to start.
#[derive(Default)]
struct Interrupt {
    requested: AtomicBool,
    wake: Notify,
}

async fn run(
    session_id: String,
    delay: Duration,
    mut turns: BoxStream<'static, Turn>,
    tx: mpsc::UnboundedSender<EngineEvent>,
    interrupt: Arc<Interrupt>,
) {
    while let Some(turn) = turns.next().await {
        let started = Instant::now();
        let _ = tx.send(EngineEvent::init(session_id.clone()));

        // Register for wakeups before checking the flag so a request made
        // in between is not missed.
        let wake = interrupt.wake.notified();
        tokio::pin!(wake);
        wake.as_mut().enable();
        let interrupted = if interrupt.requested.load(Ordering::SeqCst) {
            true
        } else {
            tokio::select! {
                _ = tokio::time::sleep(delay) => false,
                _ = &mut wake => true,
            }
        };
        // A request racing the end of the delay belongs to this turn.
        interrupt.requested.store(false, Ordering::SeqCst);

        let duration_ms = Some(started.elapsed().as_millis() as u64);
        let result = if interrupted {
            EngineEvent::Result {
                subtype: "error_during_execution".into(),
                session_id: Some(session_id.clone()),
                is_error: true,
                result: Some("interrupted".into()),
                duration_ms,
                usage: None,
            }
        } else {
            let reply = format!("echo: {}", turn.text);
            let words = turn.text.split_whitespace().count() as u64;
            let _ = tx.send(EngineEvent::Assistant {
                session_id: Some(session_id.clone()),
                message: json!({
                    "role": "assistant",
                    "content": [{ "type": "text", "text": reply }],
                }),
            });
            EngineEvent::Result {
                subtype: "success".into(),
                session_id: Some(session_id.clone()),
                is_error: false,
                result: Some(reply),
                duration_ms,
                usage: Some(Usage {
                    input_tokens: words,
                    output_tokens: words + 1,
                }),
            }
        };
        if tx.send(result).is_err() {
            return;
        }
    }
}

struct EchoControl {
    interrupt: Arc<Interrupt>,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl EngineControl for EchoControl {
    fn supports_interrupt(&self) -> bool {
        true
    }

    async fn interrupt(&self) -> Result<(), EngineError> {
        if self.task.lock().is_none() {
            return Err(EngineError::ProcessExited);
        }
        self.interrupt.requested.store(true, Ordering::SeqCst);
        self.interrupt.wake.notify_waiters();
        Ok(())
    }

    async fn shutdown(&self, _grace: Duration) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn_stream(rx: mpsc::UnboundedReceiver<Turn>) -> BoxStream<'static, Turn> {
        Box::pin(async_stream::stream! {
            let mut rx = rx;
            while let Some(turn) = rx.recv().await {
                yield turn;
            }
        })
    }

    #[tokio::test]
    async fn echoes_each_turn() {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = EchoEngine::new(Duration::ZERO)
            .connect(EngineOptions::new("a1"), turn_stream(rx))
            .await
            .unwrap();
        let mut events = conn.events;

        tx.send(Turn::user("hi there")).unwrap();
        let init = events.next().await.unwrap().unwrap();
        let id = init.init_session_id().unwrap().to_owned();
        assert!(matches!(events.next().await.unwrap().unwrap(), EngineEvent::Assistant { .. }));
        match events.next().await.unwrap().unwrap() {
            EngineEvent::Result { result, is_error, session_id, .. } => {
                assert_eq!(result.as_deref(), Some("echo: hi there"));
                assert!(!is_error);
                assert_eq!(session_id.as_deref(), Some(id.as_str()));
            }
            other => panic!("expected result, got {other:?}"),
        }

        // Same conversation id on the next turn.
        tx.send(Turn::user("again")).unwrap();
        let init = events.next().await.unwrap().unwrap();
        assert_eq!(init.init_session_id(), Some(id.as_str()));

        // Closing the input ends the stream after the pending turn.
        drop(tx);
        let rest: Vec<_> = events.collect().await;
        assert_eq!(rest.len(), 2);
    }

    #[tokio::test]
    async fn resume_keeps_requested_id() {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = EchoEngine::new(Duration::ZERO)
            .connect(
                EngineOptions::new("a1").with_resume(Some("old-id".into())),
                turn_stream(rx),
            )
            .await
            .unwrap();
        let mut events = conn.events;
        tx.send(Turn::user("x")).unwrap();
        let init = events.next().await.unwrap().unwrap();
        assert_eq!(init.init_session_id(), Some("old-id"));
    }

    #[tokio::test]
    async fn interrupt_resolves_turn_with_error_result() {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = EchoEngine::new(Duration::from_secs(30))
            .connect(EngineOptions::new("a1"), turn_stream(rx))
            .await
            .unwrap();
        let mut events = conn.events;
        tx.send(Turn::user("slow")).unwrap();
        events.next().await.unwrap().unwrap(); // init
        conn.control.interrupt().await.unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), events.next())
            .await
            .expect("interrupted turn resolves promptly");
        match result.unwrap().unwrap() {
            EngineEvent::Result { is_error, result, .. } => {
                assert!(is_error);
                assert_eq!(result.as_deref(), Some("interrupted"));
            }
            other => panic!("expected result, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn interrupt_before_the_turn_starts_still_applies() {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = EchoEngine::new(Duration::from_secs(30))
            .connect(EngineOptions::new("a1"), turn_stream(rx))
            .await
            .unwrap();
        let mut events = conn.events;

        // No await between queueing and interrupting: the engine task has
        // not seen the turn yet.
        tx.send(Turn::user("slow")).unwrap();
        conn.control.interrupt().await.unwrap();

        let collected = tokio::time::timeout(Duration::from_secs(5), async {
            let init = events.next().await.unwrap().unwrap();
            let result = events.next().await.unwrap().unwrap();
            (init, result)
        })
        .await
        .expect("interrupted turn resolves promptly");
        assert!(collected.0.init_session_id().is_some());
        match collected.1 {
            EngineEvent::Result { is_error, result, .. } => {
                assert!(is_error);
                assert_eq!(result.as_deref(), Some("interrupted"));
            }
            other => panic!("expected result, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn interrupt_does_not_carry_over_to_the_next_turn() {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = EchoEngine::new(Duration::from_millis(200))
            .connect(EngineOptions::new("a1"), turn_stream(rx))
            .await
            .unwrap();
        let mut events = conn.events;

        tx.send(Turn::user("first")).unwrap();
        conn.control.interrupt().await.unwrap();
        events.next().await.unwrap().unwrap(); // init
        assert!(matches!(
            events.next().await.unwrap().unwrap(),
            EngineEvent::Result { is_error: true, .. }
        ));

        tx.send(Turn::user("second")).unwrap();
        events.next().await.unwrap().unwrap(); // init
        assert!(matches!(events.next().await.unwrap().unwrap(), EngineEvent::Assistant { .. }));
        assert!(matches!(
            events.next().await.unwrap().unwrap(),
            EngineEvent::Result { is_error: false, .. }
        ));
    }

    #[tokio::test]
    async fn shutdown_ends_the_stream() {
        let (_tx, rx) = mpsc::unbounded_channel();
        let conn = EchoEngine::new(Duration::ZERO)
            .connect(EngineOptions::new("a1"), turn_stream(rx))
            .await
            .unwrap();
        conn.control.shutdown(Duration::ZERO).await;
        let mut events = conn.events;
        assert!(events.next().await.is_none());
        assert!(conn.control.interrupt().await.is_err());
    }
}
