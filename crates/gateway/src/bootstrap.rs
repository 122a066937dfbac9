//! AppState construction and background-task spawning.
//!
//! `serve` and `run` share this boot path so the CLI can drive turns
//! without an HTTP listener.

use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use aw_domain::config::{Config, ConfigSeverity};
use aw_engine::{create_engine, ConversationEngine};
use aw_sessions::SessionRegistry;

use crate::state::AppState;

/// Validate config, build the engine and the session registry, and return a
/// fully-wired [`AppState`].
pub fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Engine ───────────────────────────────────────────────────────
    let engine = create_engine(&config.engine);
    tracing::info!(
        kind = ?config.engine.kind,
        command = %config.engine.command,
        "conversation engine ready"
    );

    Ok(with_engine(config, engine))
}

/// Wire an [`AppState`] around an already-built engine.
pub fn with_engine(config: Arc<Config>, engine: Arc<dyn ConversationEngine>) -> AppState {
    // ── Session registry ─────────────────────────────────────────────
    let registry = Arc::new(SessionRegistry::new(
        engine.clone(),
        config.sessions.clone(),
    ));
    tracing::info!(
        agents = config.agents.len(),
        max_idle_secs = ?config.sessions.max_idle_secs,
        max_sessions = ?config.sessions.max_sessions,
        staging_timeout_secs = config.sessions.staging_timeout_secs,
        "session registry ready"
    );

    AppState {
        config,
        engine,
        registry,
        shutdown: CancellationToken::new(),
        started_at: Instant::now(),
    }
}

/// Spawn long-running background loops.  They stop when
/// `state.shutdown` is cancelled.
pub fn spawn_background_tasks(state: &AppState) -> Vec<JoinHandle<()>> {
    // ── Periodic idle reclamation ────────────────────────────────────
    let sweeper = state.registry.clone().spawn_sweeper(state.shutdown.clone());
    tracing::info!(
        interval_secs = state.config.sessions.sweep_interval_secs,
        "session sweeper started"
    );

    vec![sweeper]
}

/// Stop background loops and close every session.
pub async fn shutdown(state: &AppState, tasks: Vec<JoinHandle<()>>) {
    state.shutdown.cancel();
    for task in tasks {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "background task ended abnormally");
        }
    }
    state.registry.shutdown().await;
}

