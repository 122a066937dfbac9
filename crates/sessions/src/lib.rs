//! Streaming session multiplexer.
//!
//! Keeps one long-lived engine stream open per conversation, feeds it turns
//! on demand and routes the engine's output back to whichever caller issued
//! the turn.  At most one turn is in flight per conversation.
//!
//! - [`queue`]: the turn queue between callers and the engine.
//! - [`ConversationSession`]: one persistent stream with a single dispatch
//!   task, single-flight `send`, interrupt and close.
//! - [`SessionRegistry`]: the directory of live sessions through their id
//!   lifecycle (staging, confirmed, replaced) with idle reclamation.
//!
//! # Usage
//!
//! ```ignore
//! let registry = SessionRegistry::new(engine, config.sessions.clone());
//! let created = registry.create_session(EngineOptions::new("reviewer"), None).await?;
//! let mut handle = created.session.send(Turn::user("hello"))?;
//! while let Some(event) = handle.next_event().await {
//!     if let (Some(token), Some(id)) = (created.staging, event.init_session_id()) {
//!         registry.confirm_session_id(token, id);
//!     }
//! }
//! ```

pub mod error;
pub mod queue;
pub mod registry;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use error::SessionError;
pub use queue::{TurnQueue, TurnReceiver};
pub use registry::{NewSession, RegistryStats, SessionRegistry, StagingToken, SweepReport};
pub use session::{ConversationSession, RequestId, SessionSummary, TurnHandle};
