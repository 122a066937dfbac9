//! `agentws run`: one-shot turn.
//!
//! Boots the registry without an HTTP listener, sends one message to an
//! agent, streams the reply to stdout and closes the conversation's engine
//! before exiting.  The session id is printed to stderr so the next call
//! can pass `--session` to continue.

use std::io::Write;
use std::sync::Arc;

use aw_domain::config::Config;
use aw_domain::EngineEvent;

use crate::bootstrap;
use crate::runtime::{assistant_text, start_turn, ChatEvent, TurnRequest};

/// Execute a single agent turn and print the response.  Returns whether the
/// turn succeeded.
pub async fn run(
    config: Arc<Config>,
    agent_id: String,
    session_id: Option<String>,
    message: String,
    json_output: bool,
) -> anyhow::Result<bool> {
    let state = bootstrap::build_app_state(config)?;

    let request = TurnRequest {
        agent_id,
        message,
        session_id,
        continue_latest: false,
    };
    let mut started = start_turn(&state, request).await?;

    let mut ok = true;
    let mut session_id = started.session_id.clone();
    while let Some(event) = started.events.recv().await {
        if json_output {
            println!(
                "{}",
                serde_json::json!({ "event": event.name(), "data": event.data() })
            );
        }
        match &event {
            ChatEvent::Session { session_id: id } => session_id = Some(id.clone()),
            ChatEvent::Engine(EngineEvent::Assistant { message, .. }) if !json_output => {
                print!("{}", assistant_text(message));
                std::io::stdout().flush().ok();
            }
            ChatEvent::Engine(EngineEvent::Result { is_error, result, .. }) => {
                if !json_output {
                    println!();
                }
                if *is_error {
                    eprintln!("error: {}", result.as_deref().unwrap_or("turn failed"));
                    ok = false;
                }
            }
            ChatEvent::Error { message } => {
                eprintln!("error: {message}");
                ok = false;
            }
            ChatEvent::Engine(_) => {}
        }
    }

    if let Some(id) = session_id {
        eprintln!("session: {id}");
    }

    state.registry.shutdown().await;
    Ok(ok)
}
