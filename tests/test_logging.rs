//! Tests for logging configuration and format parsing
//!
//! Covers the pure functions that turn `[logging]` values into a subscriber
//! setup. Installing the global subscriber is only checked for idempotence.

use bridgekit::config::LoggingSection;
use bridgekit::observability::logging::{
    init_default_logging, init_from_section, parse_level, LogFormat,
};
use tracing::Level;

#[test]
fn test_log_format_parse_known_values() {
    assert_eq!(LogFormat::parse("json"), LogFormat::Json);
    assert_eq!(LogFormat::parse("PRETTY"), LogFormat::Pretty);
    assert_eq!(LogFormat::parse("Compact"), LogFormat::Compact);
}

#[test]
fn test_log_format_parse_invalid_defaults_to_json() {
    // Unknown formats fall back to JSON so daemons keep machine-readable logs
    for input in ["invalid", "", "xml", "123"] {
        assert_eq!(LogFormat::parse(input), LogFormat::Json, "input {input:?}");
    }
}

#[test]
fn test_log_format_parse_whitespace() {
    assert_eq!(LogFormat::parse("  pretty  "), LogFormat::Pretty);
    assert_eq!(LogFormat::parse("compact\n"), LogFormat::Compact);
}

#[test]
fn test_log_level_parsing() {
    let cases = [
        ("ERROR", Level::ERROR),
        ("warn", Level::WARN),
        ("Info", Level::INFO),
        ("debug", Level::DEBUG),
        ("TRACE", Level::TRACE),
        ("verbose", Level::INFO),
        ("", Level::INFO),
    ];

    for (input, expected) in cases {
        assert_eq!(parse_level(input), expected, "input {input:?}");
    }
}

#[test]
fn test_init_from_section_is_idempotent() {
    let section = LoggingSection::default();
    // Whoever installs first wins; later calls must not panic
    init_from_section(&section);
    assert!(!init_from_section(&section));
    assert!(!init_default_logging());
}
