use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use aw_domain::config::Config;
use aw_engine::ConversationEngine;
use aw_sessions::SessionRegistry;

/// Shared application state passed to all API handlers.
///
/// Built once by [`crate::bootstrap::build_app_state`]; the registry is the
/// single process-wide session directory.
#[derive(Clone)]
pub struct AppState {
    // ── Core services ─────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub engine: Arc<dyn ConversationEngine>,

    // ── Session management ────────────────────────────────────────────
    pub registry: Arc<SessionRegistry>,

    // ── Lifecycle ─────────────────────────────────────────────────────
    /// Cancelled on shutdown; stops background loops.
    pub shutdown: CancellationToken,
    pub started_at: Instant,
}
