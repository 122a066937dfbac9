//! Turn queue: the unbounded FIFO between callers pushing turns and the
//! engine pulling them.

use std::pin::Pin;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use aw_domain::Turn;

/// Create a connected queue / receiver pair.
pub fn channel() -> (TurnQueue, TurnReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        TurnQueue {
            tx: Mutex::new(Some(tx)),
        },
        TurnReceiver { rx },
    )
}

/// Producer side.  Pushing never blocks.
pub struct TurnQueue {
    tx: Mutex<Option<mpsc::UnboundedSender<Turn>>>,
}

impl TurnQueue {
    /// Append a turn.  Returns `false` (and discards the turn) once the queue
    /// has been ended or the consumer is gone.
    pub fn push(&self, turn: Turn) -> bool {
        match self.tx.lock().as_ref() {
            Some(tx) => tx.send(turn).is_ok(),
            None => false,
        }
    }

    /// Terminate the queue.  Turns already accepted are still delivered;
    /// after them the consumer observes end-of-stream.  Idempotent.
    pub fn end(&self) {
        self.tx.lock().take();
    }

    pub fn is_ended(&self) -> bool {
        self.tx.lock().is_none()
    }
}

/// Consumer side, handed to the engine as its input stream.
pub struct TurnReceiver {
    rx: mpsc::UnboundedReceiver<Turn>,
}

impl TurnReceiver {
    /// Wait for the next turn; `None` once the queue has ended and drained.
    pub async fn next_turn(&mut self) -> Option<Turn> {
        self.rx.recv().await
    }
}

impl futures_core::Stream for TurnReceiver {
    type Item = Turn;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Turn>> {
        self.rx.poll_recv(cx)
    }
}
