use anyhow::Context;

use aw_domain::config::{Config, ConfigSeverity};

/// Validate the config and print a report.  Returns `false` when any
/// error-level issue was found.
pub fn validate(config: &Config, config_path: &str) -> bool {
    let issues = config.validate();
    let (errors, warnings): (Vec<_>, Vec<_>) = issues
        .iter()
        .partition(|i| i.severity == ConfigSeverity::Error);

    for issue in errors.iter().chain(warnings.iter()) {
        println!("{issue}");
    }

    let retention = match (config.sessions.max_idle_secs, config.sessions.max_sessions) {
        (None, None) => "unbounded".to_owned(),
        (idle, cap) => format!(
            "idle {} / cap {}",
            idle.map_or("-".into(), |s| format!("{s}s")),
            cap.map_or("-".into(), |n| n.to_string()),
        ),
    };
    println!(
        "{config_path}: {} agent(s), engine {:?}, retention {retention}",
        config.agents.len(),
        config.engine.kind,
    );

    if issues.is_empty() {
        println!("Config OK");
    } else {
        println!("{} error(s), {} warning(s)", errors.len(), warnings.len());
    }
    errors.is_empty()
}

/// Dump the resolved config (with all defaults filled in) as TOML.
pub fn show(config: &Config) -> anyhow::Result<()> {
    let output = toml::to_string_pretty(config).context("serializing config")?;
    print!("{output}");
    Ok(())
}
