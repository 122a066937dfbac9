use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conversational engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Which engine implementation backs conversations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// Spawn `command` per conversation and speak newline-delimited JSON
    /// over its stdin/stdout.
    #[default]
    Process,
    /// In-process engine that echoes each turn back.  Useful for local
    /// development and tests.
    Echo,
}

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub kind: EngineKind,
    /// Executable to spawn (process engine only).
    #[serde(default = "d_command")]
    pub command: String,
    /// Arguments placed before the per-conversation option flags.
    #[serde(default = "d_args")]
    pub args: Vec<String>,
    /// Additional environment variables for the child process.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Artificial delay before the echo engine answers a turn.
    #[serde(default)]
    pub echo_delay_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            kind: EngineKind::Process,
            command: d_command(),
            args: d_args(),
            env: HashMap::new(),
            echo_delay_ms: 0,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_command() -> String {
    "claude".into()
}
fn d_args() -> Vec<String> {
    [
        "--print",
        "--verbose",
        "--input-format",
        "stream-json",
        "--output-format",
        "stream-json",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_stream_json_process() {
        let cfg: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.kind, EngineKind::Process);
        assert_eq!(cfg.command, "claude");
        assert!(cfg.args.windows(2).any(|w| w == ["--input-format", "stream-json"]));
    }

    #[test]
    fn parses_echo_kind() {
        let cfg: EngineConfig = toml::from_str(
            r#"
            kind = "echo"
            echo_delay_ms = 50
        "#,
        )
        .unwrap();
        assert_eq!(cfg.kind, EngineKind::Echo);
        assert_eq!(cfg.echo_delay_ms, 50);
    }
}
