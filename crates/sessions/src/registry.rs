//! Session registry: the process-wide directory of live conversations.
//!
//! Sessions without an engine-assigned id wait in a staging map under an
//! opaque [`StagingToken`] until the caller confirms their id.  Confirmed
//! sessions are keyed by session id, with a secondary per-agent index for
//! "latest session" lookups.  The directory lock is never held across an
//! `await`; closes happen after the maps are updated.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use aw_domain::config::SessionsConfig;
use aw_domain::trace::TraceEvent;
use aw_engine::{ConversationEngine, EngineOptions};

use crate::error::SessionError;
use crate::session::{ConversationSession, SessionSummary};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tokens and results
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Correlates a staging session with its later confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct StagingToken(uuid::Uuid);

impl StagingToken {
    fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl fmt::Display for StagingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A freshly created session.  `staging` is set when the session awaits
/// confirmation of its id.
pub struct NewSession {
    pub session: Arc<ConversationSession>,
    pub staging: Option<StagingToken>,
}

/// What one idle-reclamation sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub expired_staging: usize,
    pub idle_removed: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.expired_staging == 0 && self.idle_removed == 0
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RegistryStats {
    pub confirmed: usize,
    pub staging: usize,
    pub agents: usize,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Directory
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct Directory {
    confirmed: HashMap<String, Arc<ConversationSession>>,
    staging: HashMap<StagingToken, Arc<ConversationSession>>,
    by_agent: HashMap<String, HashSet<String>>,
}

impl Directory {
    /// Insert under a confirmed id, keeping `by_agent` in step.  Returns a
    /// different session previously held under that id.
    fn insert_confirmed(
        &mut self,
        session_id: &str,
        session: Arc<ConversationSession>,
    ) -> Option<Arc<ConversationSession>> {
        let displaced = match self.confirmed.get(session_id) {
            Some(existing) if Arc::ptr_eq(existing, &session) => None,
            Some(_) => self.remove_confirmed(session_id),
            None => None,
        };
        self.by_agent
            .entry(session.agent_id().to_owned())
            .or_default()
            .insert(session_id.to_owned());
        self.confirmed.insert(session_id.to_owned(), session);
        displaced
    }

    fn remove_confirmed(&mut self, session_id: &str) -> Option<Arc<ConversationSession>> {
        let session = self.confirmed.remove(session_id)?;
        if let Some(ids) = self.by_agent.get_mut(session.agent_id()) {
            ids.remove(session_id);
            if ids.is_empty() {
                self.by_agent.remove(session.agent_id());
            }
        }
        Some(session)
    }

    fn len(&self) -> usize {
        self.confirmed.len() + self.staging.len()
    }
}

enum Slot {
    Confirmed(String),
    Staging(StagingToken),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SessionRegistry {
    engine: Arc<dyn ConversationEngine>,
    config: SessionsConfig,
    dir: Mutex<Directory>,
}

impl SessionRegistry {
    pub fn new(engine: Arc<dyn ConversationEngine>, config: SessionsConfig) -> Self {
        Self {
            engine,
            config,
            dir: Mutex::new(Directory::default()),
        }
    }

    pub fn config(&self) -> &SessionsConfig {
        &self.config
    }

    /// Open a new session.
    ///
    /// With a `resume_id` the session goes straight into the confirmed
    /// directory under that id; otherwise it is staged and the returned
    /// token must be passed to [`confirm_session_id`](Self::confirm_session_id)
    /// once the engine announces the real id.
    pub async fn create_session(
        &self,
        options: EngineOptions,
        resume_id: Option<String>,
    ) -> Result<NewSession, SessionError> {
        let options = options.with_resume(resume_id.clone());
        let agent_id = options.agent_id.clone();
        let session =
            ConversationSession::connect(self.engine.as_ref(), options, self.config.close_grace())
                .await?;

        let (staging, displaced) = {
            let mut dir = self.dir.lock();
            match &resume_id {
                Some(id) => (None, dir.insert_confirmed(id, Arc::clone(&session))),
                None => {
                    let token = StagingToken::new();
                    dir.staging.insert(token, Arc::clone(&session));
                    (Some(token), None)
                }
            }
        };
        self.close_displaced(displaced, resume_id.as_deref());

        tracing::debug!(
            agent_id = %agent_id,
            session_id = ?resume_id,
            token = ?staging.map(|t| t.to_string()),
            "session created"
        );
        TraceEvent::SessionCreated {
            agent_id,
            session_id: resume_id.clone(),
            resumed: resume_id.is_some(),
        }
        .emit();

        self.enforce_capacity(&session).await;
        Ok(NewSession { session, staging })
    }

    /// Promote a staged session to the confirmed directory.
    ///
    /// Returns `false` (and logs) if the token is no longer staged, e.g. a
    /// second confirmation or a session already reclaimed.
    pub fn confirm_session_id(&self, token: StagingToken, session_id: &str) -> bool {
        let (session, displaced) = {
            let mut dir = self.dir.lock();
            let Some(session) = dir.staging.remove(&token) else {
                tracing::warn!(token = %token, session_id, "confirm for session not in staging");
                return false;
            };
            session.set_session_id(session_id);
            let displaced = dir.insert_confirmed(session_id, Arc::clone(&session));
            (session, displaced)
        };
        self.close_displaced(displaced, Some(session_id));

        tracing::debug!(agent_id = %session.agent_id(), session_id, "session confirmed");
        TraceEvent::SessionConfirmed {
            agent_id: session.agent_id().to_owned(),
            session_id: session_id.to_owned(),
        }
        .emit();
        true
    }

    /// Move a confirmed session from `old_id` to `new_id` in one step.
    ///
    /// Returns `false` (and logs) if `old_id` does not map to `session`.
    pub fn replace_session_id(
        &self,
        session: &Arc<ConversationSession>,
        old_id: &str,
        new_id: &str,
    ) -> bool {
        if old_id == new_id {
            return true;
        }
        let displaced = {
            let mut dir = self.dir.lock();
            match dir.confirmed.get(old_id) {
                Some(existing) if Arc::ptr_eq(existing, session) => {}
                _ => {
                    tracing::warn!(
                        old_session_id = old_id,
                        new_session_id = new_id,
                        "replace for session not confirmed under old id"
                    );
                    return false;
                }
            }
            dir.remove_confirmed(old_id);
            session.set_session_id(new_id);
            dir.insert_confirmed(new_id, Arc::clone(session))
        };
        self.close_displaced(displaced, Some(new_id));

        tracing::info!(
            agent_id = %session.agent_id(),
            old_session_id = old_id,
            new_session_id = new_id,
            "session id replaced"
        );
        TraceEvent::SessionIdReplaced {
            agent_id: session.agent_id().to_owned(),
            old_session_id: old_id.to_owned(),
            new_session_id: new_id.to_owned(),
        }
        .emit();
        true
    }

    pub fn get_session(&self, session_id: &str) -> Option<Arc<ConversationSession>> {
        self.dir.lock().confirmed.get(session_id).cloned()
    }

    /// The active confirmed session for `agent_id` with the most recent
    /// activity.
    pub fn get_latest_session_for_agent(&self, agent_id: &str) -> Option<Arc<ConversationSession>> {
        let dir = self.dir.lock();
        dir.by_agent
            .get(agent_id)?
            .iter()
            .filter_map(|id| dir.confirmed.get(id))
            .filter(|s| s.is_active())
            .max_by_key(|s| s.last_activity())
            .cloned()
    }

    /// Close and forget a confirmed session.  Returns whether it was found.
    pub async fn remove_session(&self, session_id: &str) -> bool {
        let Some(session) = self.dir.lock().remove_confirmed(session_id) else {
            return false;
        };
        session.close().await;
        TraceEvent::SessionRemoved {
            agent_id: session.agent_id().to_owned(),
            session_id: session_id.to_owned(),
            reason: "removed".into(),
        }
        .emit();
        true
    }

    /// Close and forget a staged session.  Returns whether it was found.
    pub async fn discard_staging(&self, token: StagingToken) -> bool {
        let Some(session) = self.dir.lock().staging.remove(&token) else {
            return false;
        };
        tracing::debug!(agent_id = %session.agent_id(), token = %token, "staging session discarded");
        session.close().await;
        true
    }

    pub fn list(&self) -> Vec<SessionSummary> {
        let mut out: Vec<SessionSummary> = {
            let dir = self.dir.lock();
            dir.confirmed
                .values()
                .map(|s| s.summary(false))
                .chain(dir.staging.values().map(|s| s.summary(true)))
                .collect()
        };
        out.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        out
    }

    pub fn describe(&self, session_id: &str) -> Option<SessionSummary> {
        self.get_session(session_id).map(|s| s.summary(false))
    }

    pub fn stats(&self) -> RegistryStats {
        let dir = self.dir.lock();
        RegistryStats {
            confirmed: dir.confirmed.len(),
            staging: dir.staging.len(),
            agents: dir.by_agent.len(),
        }
    }

    // ── reclamation ────────────────────────────────────────────────

    pub async fn sweep(&self) -> SweepReport {
        self.sweep_at(Utc::now()).await
    }

    /// One idle-reclamation pass against an explicit clock.
    ///
    /// Staged sessions older than the staging timeout are always reclaimed.
    /// Confirmed sessions are reclaimed only when `max_idle_secs` is set.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let staging_timeout = self.config.staging_timeout();
        let max_idle = self.config.max_idle();

        let (expired, idle) = {
            let mut dir = self.dir.lock();
            let expired_tokens: Vec<StagingToken> = dir
                .staging
                .iter()
                .filter(|(_, s)| s.age(now) > staging_timeout)
                .map(|(token, _)| *token)
                .collect();
            let expired: Vec<_> = expired_tokens
                .iter()
                .filter_map(|token| dir.staging.remove(token))
                .collect();

            let idle_ids: Vec<String> = match max_idle {
                Some(limit) => dir
                    .confirmed
                    .iter()
                    .filter(|(_, s)| s.is_idle_at(now, limit))
                    .map(|(id, _)| id.clone())
                    .collect(),
                None => Vec::new(),
            };
            let idle: Vec<_> = idle_ids
                .into_iter()
                .filter_map(|id| dir.remove_confirmed(&id).map(|s| (id, s)))
                .collect();
            (expired, idle)
        };

        for session in &expired {
            tracing::info!(agent_id = %session.agent_id(), "staging session expired");
            TraceEvent::StagingExpired {
                agent_id: session.agent_id().to_owned(),
                age_secs: session.age(now).as_secs() as i64,
            }
            .emit();
        }
        for (id, session) in &idle {
            tracing::info!(agent_id = %session.agent_id(), session_id = %id, "idle session reclaimed");
            TraceEvent::SessionEvicted {
                agent_id: session.agent_id().to_owned(),
                session_id: Some(id.clone()),
                idle_secs: session.idle_for(now).as_secs() as i64,
            }
            .emit();
        }

        let report = SweepReport {
            expired_staging: expired.len(),
            idle_removed: idle.len(),
        };
        let doomed: Vec<_> = expired
            .into_iter()
            .chain(idle.into_iter().map(|(_, s)| s))
            .collect();
        join_all(doomed.iter().map(|s| s.close())).await;
        report
    }

    /// Run [`sweep`](Self::sweep) every `sweep_interval_secs` until
    /// `shutdown` is cancelled.
    pub fn spawn_sweeper(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let period = self.config.sweep_interval();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await; // first tick completes immediately
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        let report = self.sweep().await;
                        if !report.is_empty() {
                            tracing::info!(
                                expired_staging = report.expired_staging,
                                idle_removed = report.idle_removed,
                                "session sweep"
                            );
                        }
                    }
                }
            }
            tracing::debug!("session sweeper stopped");
        })
    }

    /// Evict least-recently-active idle sessions while over `max_sessions`.
    async fn enforce_capacity(&self, keep: &Arc<ConversationSession>) {
        let Some(max) = self.config.max_sessions else {
            return;
        };
        let (excess, evicted): (usize, Vec<Arc<ConversationSession>>) = {
            let mut dir = self.dir.lock();
            let excess = dir.len().saturating_sub(max);
            if excess == 0 {
                return;
            }
            let mut candidates: Vec<(DateTime<Utc>, Slot)> = dir
                .confirmed
                .iter()
                .filter(|(_, s)| !Arc::ptr_eq(*s, keep) && !s.is_processing())
                .map(|(id, s)| (s.last_activity(), Slot::Confirmed(id.clone())))
                .chain(
                    dir.staging
                        .iter()
                        .filter(|(_, s)| !Arc::ptr_eq(*s, keep) && !s.is_processing())
                        .map(|(token, s)| (s.last_activity(), Slot::Staging(*token))),
                )
                .collect();
            candidates.sort_by_key(|(at, _)| *at);
            let evicted = candidates
                .into_iter()
                .take(excess)
                .filter_map(|(_, slot)| match slot {
                    Slot::Confirmed(id) => dir.remove_confirmed(&id),
                    Slot::Staging(token) => dir.staging.remove(&token),
                })
                .collect();
            (excess, evicted)
        };

        if evicted.len() < excess {
            tracing::warn!(
                max_sessions = max,
                over_by = excess - evicted.len(),
                "over capacity but remaining sessions are busy"
            );
        }

        let now = Utc::now();
        for session in &evicted {
            tracing::info!(
                agent_id = %session.agent_id(),
                session_id = ?session.session_id(),
                max_sessions = max,
                "evicting session over capacity"
            );
            TraceEvent::SessionEvicted {
                agent_id: session.agent_id().to_owned(),
                session_id: session.session_id(),
                idle_secs: session.idle_for(now).as_secs() as i64,
            }
            .emit();
        }
        join_all(evicted.iter().map(|s| s.close())).await;
    }

    /// Close a session that lost its id to another one, without blocking
    /// the caller.
    fn close_displaced(&self, displaced: Option<Arc<ConversationSession>>, session_id: Option<&str>) {
        let Some(old) = displaced else {
            return;
        };
        tracing::warn!(
            agent_id = %old.agent_id(),
            session_id = ?session_id,
            "session id taken over by another session, closing the old one"
        );
        tokio::spawn(async move { old.close().await });
    }

    /// Close every session and clear the directory.
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<ConversationSession>> = {
            let mut guard = self.dir.lock();
            let dir = &mut *guard;
            dir.by_agent.clear();
            dir.confirmed
                .drain()
                .map(|(_, s)| s)
                .chain(dir.staging.drain().map(|(_, s)| s))
                .collect()
        };
        tracing::info!(count = sessions.len(), "closing all sessions");
        join_all(sessions.iter().map(|s| s.close())).await;
    }
}
