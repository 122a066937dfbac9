//! `aw-engine`: the boundary to the external conversational engine.
//!
//! This crate provides:
//! - The [`ConversationEngine`] trait: open one persistent, bidirectional
//!   stream per conversation from an [`EngineOptions`] bundle and a stream
//!   of turns.
//! - [`ProcessEngine`]: spawns an engine CLI per conversation and speaks
//!   newline-delimited JSON over its stdin/stdout.
//! - [`EchoEngine`]: an in-process engine that answers every turn with an
//!   echo, for local development and tests.
//!
//! # Usage
//!
//! ```rust,ignore
//! use aw_engine::{create_engine, EngineOptions};
//!
//! let engine = create_engine(&config.engine);
//! let conn = engine.connect(EngineOptions::new("reviewer"), turns).await?;
//! while let Some(event) = conn.events.next().await { /* ... */ }
//! ```

pub mod echo;
pub mod engine;
pub mod options;
pub mod process;
pub mod protocol;

use std::sync::Arc;
use std::time::Duration;

use aw_domain::config::{EngineConfig, EngineKind};

// Re-exports for convenience.
pub use echo::EchoEngine;
pub use engine::{ConversationEngine, EngineConnection, EngineControl, EngineError, EventStream};
pub use options::EngineOptions;
pub use process::ProcessEngine;

/// Build the engine selected by the configuration.
pub fn create_engine(config: &EngineConfig) -> Arc<dyn ConversationEngine> {
    match config.kind {
        EngineKind::Process => Arc::new(ProcessEngine::new(config.clone())),
        EngineKind::Echo => Arc::new(EchoEngine::new(Duration::from_millis(config.echo_delay_ms))),
    }
}
