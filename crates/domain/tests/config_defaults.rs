use aw_domain::config::{Config, LogFormat};

#[test]
fn default_host_is_localhost() {
    let config = Config::default();
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.server.port, 3210);
}

#[test]
fn explicit_zero_host_parses() {
    let toml_str = r#"
[server]
host = "0.0.0.0"
port = 3210
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.server.host, "0.0.0.0");
}

#[test]
fn default_cors_allows_only_localhost() {
    let config = Config::default();
    let origins = &config.server.cors.allowed_origins;
    assert!(origins.contains(&"http://localhost:*".to_string()));
    assert!(origins.iter().all(|o| o.contains("localhost") || o.contains("127.0.0.1")));
}

#[test]
fn cors_config_parses_custom_origins() {
    let toml_str = r#"
[server.cors]
allowed_origins = ["https://myapp.com", "http://localhost:3000"]
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.server.cors.allowed_origins.len(), 2);
}

#[test]
fn observability_defaults_to_json_without_export() {
    let config = Config::default();
    assert_eq!(config.observability.log_format, LogFormat::Json);
    assert!(config.observability.otlp_endpoint.is_none());
    assert_eq!(config.observability.service_name, "agentws");
}

#[test]
fn compact_logs_and_otlp_parse() {
    let toml_str = r#"
[observability]
log_format = "compact"
otlp_endpoint = "http://localhost:4317"
sample_rate = 0.25
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.observability.log_format, LogFormat::Compact);
    assert_eq!(
        config.observability.otlp_endpoint.as_deref(),
        Some("http://localhost:4317")
    );
    assert!((config.observability.sample_rate - 0.25).abs() < f64::EPSILON);
}

#[test]
fn defaults_round_trip_through_toml() {
    let config = Config::default();
    let text = toml::to_string_pretty(&config).unwrap();
    let back: Config = toml::from_str(&text).unwrap();
    assert_eq!(back.sessions.staging_timeout_secs, config.sessions.staging_timeout_secs);
    assert_eq!(back.engine.command, config.engine.command);
}
