use std::time::Duration;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session registry policy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Lifecycle rules for live conversation sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Period of the idle-reclamation sweep, in seconds.
    #[serde(default = "d_300")]
    pub sweep_interval_secs: u64,

    /// Confirmed sessions idle for longer than this are closed and removed.
    /// `None` (the default) keeps confirmed sessions until they are removed
    /// explicitly, since resumption depends on their registration.
    #[serde(default)]
    pub max_idle_secs: Option<u64>,

    /// Sessions that never received an engine-assigned id are dropped after
    /// this many seconds, regardless of `max_idle_secs`.
    #[serde(default = "d_1800")]
    pub staging_timeout_secs: u64,

    /// Upper bound on live sessions.  When exceeded, the least recently
    /// active idle sessions are evicted.  `None` = unbounded.
    #[serde(default)]
    pub max_sessions: Option<usize>,

    /// How long a closing session waits for the engine to exit.
    #[serde(default = "d_2000")]
    pub close_grace_ms: u64,

    /// Longest gap between two events of one turn before the caller gives
    /// up on it.
    #[serde(default = "d_600")]
    pub turn_timeout_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: d_300(),
            max_idle_secs: None,
            staging_timeout_secs: d_1800(),
            max_sessions: None,
            close_grace_ms: d_2000(),
            turn_timeout_secs: d_600(),
        }
    }
}

impl SessionsConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn max_idle(&self) -> Option<Duration> {
        self.max_idle_secs.map(Duration::from_secs)
    }

    pub fn staging_timeout(&self) -> Duration {
        Duration::from_secs(self.staging_timeout_secs)
    }

    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }

    pub fn turn_timeout(&self) -> Duration {
        Duration::from_secs(self.turn_timeout_secs)
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_300() -> u64 {
    300
}
fn d_600() -> u64 {
    600
}
fn d_1800() -> u64 {
    1800
}
fn d_2000() -> u64 {
    2000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_keep_confirmed_sessions_forever() {
        let cfg: SessionsConfig = toml::from_str("").unwrap();
        assert!(cfg.max_idle().is_none());
        assert!(cfg.max_sessions.is_none());
        assert_eq!(cfg.sweep_interval(), Duration::from_secs(300));
        assert_eq!(cfg.staging_timeout(), Duration::from_secs(30 * 60));
    }

    #[test]
    fn parses_overrides() {
        let toml_str = r#"
            max_idle_secs = 3600
            staging_timeout_secs = 60
            max_sessions = 128
            close_grace_ms = 250
        "#;
        let cfg: SessionsConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.max_idle(), Some(Duration::from_secs(3600)));
        assert_eq!(cfg.staging_timeout(), Duration::from_secs(60));
        assert_eq!(cfg.max_sessions, Some(128));
        assert_eq!(cfg.close_grace(), Duration::from_millis(250));
        assert_eq!(cfg.turn_timeout(), Duration::from_secs(600));
    }
}
