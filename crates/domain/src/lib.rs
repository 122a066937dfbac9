//! Shared types for the agent workspace crates: configuration model, error
//! type, engine output events, and structured trace events.

pub mod config;
pub mod error;
pub mod event;
pub mod trace;

pub use error::{Error, Result};
pub use event::{BoxStream, EngineEvent, Turn, Usage};
