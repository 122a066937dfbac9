//! Engine contract.
//!
//! An engine accepts a pushed sequence of turns and produces an ordered,
//! asynchronous sequence of output events for one conversation.  It may
//! assign (or, on resumption, reassign) the conversation id at any time via
//! a `system/init` event.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use aw_domain::{BoxStream, EngineEvent, Turn};

use crate::options::EngineOptions;

/// Ordered output of one engine stream.  An `Err` item is unrecoverable:
/// the stream is considered dead after it.
pub type EventStream = BoxStream<'static, Result<EngineEvent, EngineError>>;

/// Trait for conversational engines.
#[async_trait]
pub trait ConversationEngine: Send + Sync {
    /// Establish a persistent stream for one conversation.
    ///
    /// `turns` is pulled by the engine for the lifetime of the stream; when
    /// it ends the engine should finish its current work and close.
    async fn connect(
        &self,
        options: EngineOptions,
        turns: BoxStream<'static, Turn>,
    ) -> Result<EngineConnection, EngineError>;
}

/// Out-of-band control over a live engine stream.
#[async_trait]
pub trait EngineControl: Send + Sync {
    /// Whether [`interrupt`](Self::interrupt) is implemented.
    fn supports_interrupt(&self) -> bool;

    /// Ask the engine to abandon the current turn.  The engine still emits
    /// a terminal event for it.
    async fn interrupt(&self) -> Result<(), EngineError>;

    /// Tear the stream down, giving the engine up to `grace` to exit.
    async fn shutdown(&self, grace: Duration);
}

/// A live engine stream: the event source plus its control handle.
pub struct EngineConnection {
    pub events: EventStream,
    pub control: Arc<dyn EngineControl>,
}

/// Errors that can occur while talking to an engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("failed to start engine: {0}")]
    Spawn(std::io::Error),

    #[error("engine I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("engine JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("engine process has exited")]
    ProcessExited,

    #[error("engine rejected the stream: {0}")]
    Rejected(String),

    #[error("not supported by this engine: {0}")]
    Unsupported(String),
}
