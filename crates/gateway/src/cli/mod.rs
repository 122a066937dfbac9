pub mod config;
pub mod run;

use std::path::Path;

use anyhow::Context;
use clap::{Parser, Subcommand};

use aw_domain::config::Config;

/// agentws: streaming session multiplexer for conversational agent engines.
#[derive(Debug, Parser)]
#[command(name = "agentws", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the gateway server (default when no subcommand is given).
    Serve,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Send a single message to an agent and print the reply.
    Run {
        /// Agent id from config.toml.
        #[arg(long)]
        agent: String,
        /// Resume this conversation instead of starting a new one.
        #[arg(long)]
        session: Option<String>,
        /// The message to send.
        message: String,
        /// Print every engine event as JSON instead of plain text.
        #[arg(long)]
        json: bool,
    },
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from the path specified by `AW_CONFIG` (or
/// `config.toml` by default).  Returns the parsed [`Config`] and the
/// path that was used.
pub fn load_config() -> anyhow::Result<(Config, String)> {
    let config_path = std::env::var("AW_CONFIG").unwrap_or_else(|_| "config.toml".into());
    let config = load_config_from(Path::new(&config_path))?;
    Ok((config, config_path))
}

/// Parse `path`, falling back to defaults when the file does not exist.
pub fn load_config_from(path: &Path) -> anyhow::Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use aw_domain::config::EngineKind;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("absent.toml")).unwrap();
        assert!(config.agents.is_empty());
        assert_eq!(config.sessions.staging_timeout_secs, 1800);
    }

    #[test]
    fn parses_agents_and_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[sessions]
max_idle_secs = 900
max_sessions = 8

[engine]
kind = "echo"

[agents.reviewer]
model = "sonnet"
permission_mode = "plan"

[agents.reviewer.tools]
allow = ["Read", "Grep"]
"#,
        )
        .unwrap();

        let config = load_config_from(&path).unwrap();
        assert_eq!(config.sessions.max_idle_secs, Some(900));
        assert_eq!(config.sessions.max_sessions, Some(8));
        assert_eq!(config.engine.kind, EngineKind::Echo);
        let reviewer = config.agent("reviewer").unwrap();
        assert_eq!(reviewer.model.as_deref(), Some("sonnet"));
        assert_eq!(reviewer.tools.allow, vec!["Read", "Grep"]);
    }

    #[test]
    fn malformed_file_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[sessions\nmax_idle_secs = ").unwrap();
        let err = load_config_from(&path).unwrap_err();
        assert!(format!("{err:#}").contains("broken.toml"));
    }

    #[test]
    fn run_arguments_parse() {
        let cli = Cli::try_parse_from([
            "agentws", "run", "--agent", "reviewer", "--session", "s1", "hello",
        ])
        .unwrap();
        match cli.command {
            Some(Command::Run {
                agent,
                session,
                message,
                json,
            }) => {
                assert_eq!(agent, "reviewer");
                assert_eq!(session.as_deref(), Some("s1"));
                assert_eq!(message, "hello");
                assert!(!json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
