use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent definitions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Configuration for one agent: the options bundle handed to the engine
/// whenever a conversation is opened for it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Human-readable summary shown by `GET /v1/agents`.
    #[serde(default)]
    pub description: Option<String>,
    /// System prompt passed to the engine.
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Engine model override.
    #[serde(default)]
    pub model: Option<String>,
    /// Working directory the engine runs in.  Falls back to the gateway's
    /// current directory if not set.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Engine permission mode (e.g. `"acceptEdits"`).
    #[serde(default)]
    pub permission_mode: Option<String>,
    /// Tool allow/deny lists forwarded to the engine.
    #[serde(default)]
    pub tools: ToolPolicy,
}

/// Tool allow/deny lists.  Names are engine tool names, matched
/// case-insensitively when checking for conflicts.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolPolicy {
    /// Tools the agent may use.  Empty = engine default.
    #[serde(default)]
    pub allow: Vec<String>,
    /// Tools the agent is denied.
    #[serde(default)]
    pub deny: Vec<String>,
}

impl ToolPolicy {
    /// Tool names that appear in both `allow` and `deny`.
    pub fn conflicts(&self) -> Vec<String> {
        self.allow
            .iter()
            .filter(|a| self.deny.iter().any(|d| d.eq_ignore_ascii_case(a)))
            .cloned()
            .collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
