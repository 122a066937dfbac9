//! Agent workspace gateway: composition root, turn runtime, HTTP routes and
//! CLI for the streaming session multiplexer.

pub mod api;
pub mod bootstrap;
pub mod cli;
pub mod runtime;
pub mod state;
