//! # Configuration Tests
//!
//! Defaults, partial documents, file loading and rejection of bad input.

use std::io::Write;

use blinksim_core::common::ConfigError;
use blinksim_core::config::*;
use blinksim_core::soc::LogLevel;
use pretty_assertions::assert_eq;

#[test]
fn test_config_default() {
    let config = Config::default();
    assert_eq!(config.device.flash_base, 0x1000_0000);
    assert_eq!(config.device.flash_size, 2 * 1024 * 1024);
    assert_eq!(config.device.pin_count, 30);
    assert_eq!(config.device.bootrom, None);
    assert_eq!(config.loader.base_offset, 0);
    assert!(config.loader.verify_checksums);
    assert!(!config.loader.atomic);
    assert_eq!(config.session.execution, ExecutionMode::Threaded);
    assert_eq!(config.session.slice_ticks, 1_000);
    assert_eq!(config.session.clock_hz, 1_000);
    assert_eq!(config.session.device_log_level, LogLevel::Error);
}

#[test]
fn test_empty_document_yields_defaults() {
    let config = Config::from_json("{}").unwrap();
    assert_eq!(config.device.pin_count, Config::default().device.pin_count);
    assert_eq!(config.session.execution, ExecutionMode::Threaded);
}

#[test]
fn test_partial_section_keeps_sibling_defaults() {
    let config = Config::from_json(r#"{ "loader": { "verify_checksums": false } }"#).unwrap();
    assert!(!config.loader.verify_checksums);
    assert!(!config.loader.atomic);
    assert_eq!(config.loader.base_offset, 0);
    assert_eq!(config.device.flash_base, 0x1000_0000);
}

#[test]
fn test_log_level_and_mode_names() {
    let config = Config::from_json(
        r#"{ "session": { "execution": "Cooperative", "device_log_level": "Debug", "clock_hz": 0 } }"#,
    )
    .unwrap();
    assert_eq!(config.session.execution, ExecutionMode::Cooperative);
    assert_eq!(config.session.device_log_level, LogLevel::Debug);
    assert_eq!(config.session.clock_hz, 0);
}

#[test]
fn test_mistyped_field_is_rejected() {
    let err = Config::from_json(r#"{ "device": { "pin_count": "thirty" } }"#).unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn test_unknown_mode_is_rejected() {
    let err = Config::from_json(r#"{ "session": { "execution": "Turbo" } }"#).unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn test_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, r#"{{ "device": {{ "pin_count": 8, "flash_base": 0 }} }}"#).unwrap();
    let config = Config::from_file(file.path()).unwrap();
    assert_eq!(config.device.pin_count, 8);
    assert_eq!(config.device.flash_base, 0);
}

#[test]
fn test_missing_file_names_the_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.json");
    match Config::from_file(&path) {
        Err(ConfigError::Parse(message)) => assert!(message.contains("absent.json")),
        other => panic!("expected parse error, got {other:?}"),
    }
}

#[test]
fn test_log_level_filter_ordering() {
    assert!(LogLevel::Error.allows(LogLevel::Error));
    assert!(!LogLevel::Error.allows(LogLevel::Warn));
    assert!(LogLevel::Debug.allows(LogLevel::Info));
    assert!(!LogLevel::Info.allows(LogLevel::Debug));
}
