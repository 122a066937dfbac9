mod agents;
mod engine;
mod observability;
mod server;
mod sessions;

pub use agents::*;
pub use engine::*;
pub use observability::*;
pub use server::*;
pub use sessions::*;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
    /// Agent definitions (key = agent_id).
    #[serde(default)]
    pub agents: BTreeMap<String, AgentConfig>,
}

impl Config {
    /// Look up an agent definition by id.
    pub fn agent(&self, agent_id: &str) -> Result<&AgentConfig> {
        self.agents
            .get(agent_id)
            .ok_or_else(|| Error::UnknownAgent(agent_id.to_owned()))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl ConfigError {
    fn error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            field: field.into(),
            message: message.into(),
        }
    }

    fn warning(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            field: field.into(),
            message: message.into(),
        }
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push(ConfigError::error("server.port", "port must be greater than 0"));
        }
        if self.server.host.is_empty() {
            errors.push(ConfigError::error("server.host", "host must not be empty"));
        }
        if self.server.max_concurrent_requests == 0 {
            errors.push(ConfigError::error(
                "server.max_concurrent_requests",
                "must be greater than 0",
            ));
        }
        if self.server.cors.allowed_origins.len() == 1
            && self.server.cors.allowed_origins[0] == "*"
        {
            errors.push(ConfigError::warning(
                "server.cors.allowed_origins",
                "wildcard \"*\" allows all origins (not recommended for production)",
            ));
        }

        // ── Sessions ────────────────────────────────────────────────
        if self.sessions.sweep_interval_secs == 0 {
            errors.push(ConfigError::error(
                "sessions.sweep_interval_secs",
                "sweep interval must be greater than 0",
            ));
        }
        if self.sessions.staging_timeout_secs == 0 {
            errors.push(ConfigError::error(
                "sessions.staging_timeout_secs",
                "staging timeout must be greater than 0",
            ));
        }
        if self.sessions.turn_timeout_secs == 0 {
            errors.push(ConfigError::error(
                "sessions.turn_timeout_secs",
                "turn timeout must be greater than 0",
            ));
        }
        if self.sessions.max_sessions == Some(0) {
            errors.push(ConfigError::error(
                "sessions.max_sessions",
                "max_sessions must be greater than 0 when set",
            ));
        }
        if self.sessions.max_idle_secs.is_none() && self.sessions.max_sessions.is_none() {
            errors.push(ConfigError::warning(
                "sessions",
                "neither max_idle_secs nor max_sessions is set; confirmed sessions \
                 accumulate until removed explicitly",
            ));
        }

        // ── Engine ──────────────────────────────────────────────────
        if self.engine.kind == EngineKind::Process && self.engine.command.trim().is_empty() {
            errors.push(ConfigError::error(
                "engine.command",
                "command must not be empty for the process engine",
            ));
        }

        // ── Agents ──────────────────────────────────────────────────
        if self.agents.is_empty() {
            errors.push(ConfigError::warning("agents", "no agents configured"));
        }
        for (id, agent) in &self.agents {
            if id.trim().is_empty() {
                errors.push(ConfigError::error("agents", "agent id must not be empty"));
            }
            for tool in agent.tools.conflicts() {
                errors.push(ConfigError::warning(
                    format!("agents.{id}.tools"),
                    format!("tool \"{tool}\" is both allowed and denied (deny wins)"),
                ));
            }
            if let Some(dir) = &agent.working_dir {
                if !dir.is_dir() {
                    errors.push(ConfigError::warning(
                        format!("agents.{id}.working_dir"),
                        format!("{} is not a directory", dir.display()),
                    ));
                }
            }
        }

        errors
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn errors_of(cfg: &Config) -> Vec<String> {
        cfg.validate()
            .into_iter()
            .filter(|e| e.severity == ConfigSeverity::Error)
            .map(|e| e.field)
            .collect()
    }

    #[test]
    fn default_config_has_only_warnings() {
        let cfg = Config::default();
        assert!(errors_of(&cfg).is_empty());
        let warnings: Vec<_> = cfg.validate().into_iter().map(|e| e.field).collect();
        assert!(warnings.contains(&"agents".to_string()));
        assert!(warnings.contains(&"sessions".to_string()));
    }

    #[test]
    fn zero_port_and_empty_command_are_errors() {
        let mut cfg = Config::default();
        cfg.server.port = 0;
        cfg.engine.command = "  ".into();
        let errors = errors_of(&cfg);
        assert!(errors.contains(&"server.port".to_string()));
        assert!(errors.contains(&"engine.command".to_string()));
    }

    #[test]
    fn echo_engine_does_not_need_a_command() {
        let mut cfg = Config::default();
        cfg.engine.kind = EngineKind::Echo;
        cfg.engine.command.clear();
        assert!(errors_of(&cfg).is_empty());
    }

    #[test]
    fn zero_max_sessions_is_an_error() {
        let mut cfg = Config::default();
        cfg.sessions.max_sessions = Some(0);
        assert!(errors_of(&cfg).contains(&"sessions.max_sessions".to_string()));
    }

    #[test]
    fn zero_turn_timeout_is_an_error() {
        let mut cfg = Config::default();
        cfg.sessions.turn_timeout_secs = 0;
        assert_eq!(errors_of(&cfg), vec!["sessions.turn_timeout_secs".to_string()]);
    }

    #[test]
    fn full_config_parses() {
        let toml_str = r#"
            [server]
            port = 4000

            [sessions]
            max_sessions = 50

            [engine]
            kind = "echo"

            [agents.reviewer]
            system_prompt = "Review code."

            [agents.writer]
            model = "sonnet"
        "#;
        let cfg: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.server.port, 4000);
        assert_eq!(cfg.sessions.max_sessions, Some(50));
        assert_eq!(cfg.engine.kind, EngineKind::Echo);
        assert_eq!(cfg.agents.len(), 2);
        assert!(cfg.agent("reviewer").is_ok());
        assert!(matches!(cfg.agent("nobody"), Err(Error::UnknownAgent(id)) if id == "nobody"));
    }
}
