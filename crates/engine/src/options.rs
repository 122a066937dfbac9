use std::path::PathBuf;

use aw_domain::config::AgentConfig;

/// Options bundle for opening one conversation stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineOptions {
    pub agent_id: String,
    pub system_prompt: Option<String>,
    pub model: Option<String>,
    pub working_dir: Option<PathBuf>,
    pub permission_mode: Option<String>,
    pub allowed_tools: Vec<String>,
    pub disallowed_tools: Vec<String>,
    /// Conversation id to resume.  The engine may honour it or fork a new
    /// conversation and announce a different id.
    pub resume: Option<String>,
}

impl EngineOptions {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            ..Default::default()
        }
    }

    /// Build the options for an agent definition.
    pub fn for_agent(agent_id: &str, agent: &AgentConfig) -> Self {
        Self {
            agent_id: agent_id.to_owned(),
            system_prompt: agent.system_prompt.clone(),
            model: agent.model.clone(),
            working_dir: agent.working_dir.clone(),
            permission_mode: agent.permission_mode.clone(),
            allowed_tools: agent.tools.allow.clone(),
            disallowed_tools: agent.tools.deny.clone(),
            resume: None,
        }
    }

    /// Set the resumption hint.
    pub fn with_resume(mut self, session_id: Option<String>) -> Self {
        self.resume = session_id;
        self
    }

    /// Render the per-conversation command-line flags for the process engine.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(prompt) = &self.system_prompt {
            args.push("--system-prompt".into());
            args.push(prompt.clone());
        }
        if let Some(model) = &self.model {
            args.push("--model".into());
            args.push(model.clone());
        }
        if let Some(mode) = &self.permission_mode {
            args.push("--permission-mode".into());
            args.push(mode.clone());
        }
        if !self.allowed_tools.is_empty() {
            args.push("--allowedTools".into());
            args.push(self.allowed_tools.join(","));
        }
        if !self.disallowed_tools.is_empty() {
            args.push("--disallowedTools".into());
            args.push(self.disallowed_tools.join(","));
        }
        if let Some(id) = &self.resume {
            args.push("--resume".into());
            args.push(id.clone());
        }
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aw_domain::config::ToolPolicy;

    #[test]
    fn agent_options_map_to_flags() {
        let agent = AgentConfig {
            system_prompt: Some("be brief".into()),
            tools: ToolPolicy {
                allow: vec!["Read".into(), "Grep".into()],
                deny: vec!["Bash".into()],
            },
            ..Default::default()
        };
        let opts = EngineOptions::for_agent("a1", &agent).with_resume(Some("sess-9".into()));
        assert_eq!(opts.agent_id, "a1");
        assert_eq!(
            opts.to_args(),
            vec![
                "--system-prompt",
                "be brief",
                "--allowedTools",
                "Read,Grep",
                "--disallowedTools",
                "Bash",
                "--resume",
                "sess-9",
            ]
        );
    }

    #[test]
    fn bare_options_render_no_flags() {
        assert!(EngineOptions::new("a1").to_args().is_empty());
    }
}
