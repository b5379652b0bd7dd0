//! Configuration loading and validation tests
//!
//! Tests focus on observable outcomes of loading a settings file: parsed
//! values, defaults for omitted sections, and the error for each failure mode.

use bridgekit::config::{ConfigError, Settings};
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    write!(temp_file, "{content}").unwrap();
    temp_file
}

#[test]
fn test_config_loads_successfully_from_valid_toml() {
    let temp_file = write_config(
        r#"
[app]
name = "greenhouse"
prefix = "gh"
version = "2.1.0"
heartbeat_interval_secs = 30

[mqtt]
broker_url = "mqtt://broker.lan:1883"
client_id = "greenhouse-pi"
keep_alive_secs = 20
reconnect_backoff_ms = [100, 200]

[logging]
format = "compact"
spans = true
"#,
    );

    let settings = Settings::load_from_file(temp_file.path()).unwrap();

    assert_eq!(settings.app.name.as_deref(), Some("greenhouse"));
    assert_eq!(settings.app.prefix.as_deref(), Some("gh"));
    assert_eq!(settings.app.version.as_deref(), Some("2.1.0"));
    assert_eq!(settings.app.heartbeat_interval(), Some(Duration::from_secs(30)));
    assert_eq!(settings.mqtt.broker_url, "mqtt://broker.lan:1883");
    assert_eq!(settings.mqtt.client_id.as_deref(), Some("greenhouse-pi"));
    assert_eq!(settings.mqtt.keep_alive_secs, 20);
    assert_eq!(settings.mqtt.reconnect_backoff_ms, vec![100, 200]);
    assert!(settings.logging.spans);
}

#[test]
fn test_config_omitted_sections_use_defaults() {
    let temp_file = write_config("[app]\nname = \"shed\"\n");

    let settings = Settings::load_from_file(temp_file.path()).unwrap();
    let defaults = Settings::default();

    assert_eq!(settings.app.name.as_deref(), Some("shed"));
    assert_eq!(settings.app.heartbeat_interval(), Some(Duration::from_secs(60)));
    assert_eq!(settings.mqtt.keep_alive_secs, defaults.mqtt.keep_alive_secs);
    assert_eq!(
        settings.mqtt.reconnect_backoff_ms,
        defaults.mqtt.reconnect_backoff_ms
    );
}

#[test]
fn test_empty_file_is_all_defaults() {
    let temp_file = write_config("");
    let settings = Settings::load_from_file(temp_file.path()).unwrap();
    assert_eq!(settings.app.name, None);
    assert_eq!(settings.mqtt.client_id, None);
}

#[test]
fn test_zero_heartbeat_disables_periodic_heartbeat() {
    let temp_file = write_config("[app]\nheartbeat_interval_secs = 0\n");
    let settings = Settings::load_from_file(temp_file.path()).unwrap();
    assert_eq!(settings.app.heartbeat_interval(), None);
}

#[test]
fn test_invalid_toml_syntax_fails() {
    let temp_file = write_config("[app\nname = \"broken\"\n");

    let result = Settings::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_wrong_value_type_fails() {
    let temp_file = write_config("[mqtt]\nkeep_alive_secs = \"soon\"\n");

    let result = Settings::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_missing_file_fails() {
    let result = Settings::load_from_file(Path::new("/nonexistent/bridgekit.toml"));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_invalid_app_name_fails_validation() {
    let temp_file = write_config("[app]\nname = \"green house\"\n");

    let result = Settings::load_from_file(temp_file.path());
    match result {
        Err(ConfigError::InvalidConfig(message)) => assert!(message.contains("app.name")),
        other => panic!("expected InvalidConfig, got {other:?}"),
    }
}

#[test]
fn test_prefix_with_wildcard_fails_validation() {
    let temp_file = write_config("[app]\nprefix = \"home/+\"\n");

    let result = Settings::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
}

#[test]
fn test_zero_keep_alive_fails_validation() {
    let temp_file = write_config("[mqtt]\nkeep_alive_secs = 0\n");

    let result = Settings::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
}

#[test]
fn test_settings_round_trip_through_toml() {
    let mut settings = Settings::default();
    settings.app.prefix = Some("lab".to_string());

    let text = toml::to_string_pretty(&settings).unwrap();
    let parsed = Settings::from_toml_str(&text).unwrap();
    assert_eq!(parsed, settings);
}
