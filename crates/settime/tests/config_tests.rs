//! Integration tests for configuration parsing
//!
//! Tests configuration loading, including:
//! - Minimal and full config files
//! - Defaults for missing sections
//! - Invalid configuration handling
//! - Save/load through the filesystem

use settime::{PermissionPolicy, SetTimeConfig};
use std::time::Duration;

const FULL_CONFIG: &str = r#"
[agent]
log_level = "debug"
permission = "prompt"

[usb]
write_timeout_ms = 1500
hotplug = false
"#;

mod parsing {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config = SetTimeConfig::parse(FULL_CONFIG).unwrap();

        assert_eq!(config.agent.log_level, "debug");
        assert_eq!(config.agent.permission, PermissionPolicy::Prompt);
        assert_eq!(config.usb.write_timeout(), Duration::from_millis(1500));
        assert!(!config.usb.hotplug);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = SetTimeConfig::parse("").unwrap();

        assert_eq!(config.agent.log_level, "info");
        assert_eq!(config.agent.permission, PermissionPolicy::Auto);
        assert_eq!(config.usb.write_timeout(), Duration::ZERO);
        assert!(config.usb.hotplug);
    }

    #[test]
    fn test_partial_section_fills_defaults() {
        let config = SetTimeConfig::parse("[usb]\nwrite_timeout_ms = 250\n").unwrap();

        assert_eq!(config.usb.write_timeout_ms, 250);
        assert!(config.usb.hotplug);
        assert_eq!(config.agent.log_level, "info");
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let result = SetTimeConfig::parse("[agent]\nlog_level = \"verbose\"\n");
        let message = format!("{:#}", result.unwrap_err());
        assert!(message.contains("verbose"));
    }

    #[test]
    fn test_unknown_permission_policy_rejected() {
        assert!(SetTimeConfig::parse("[agent]\npermission = \"always\"\n").is_err());
    }

    #[test]
    fn test_wrong_type_rejected() {
        assert!(SetTimeConfig::parse("[usb]\nwrite_timeout_ms = \"soon\"\n").is_err());
    }
}

mod filesystem {
    use super::*;

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = SetTimeConfig::default();
        config.agent.permission = PermissionPolicy::Prompt;
        config.usb.write_timeout_ms = 42;
        config.save(&path).unwrap();

        let loaded = SetTimeConfig::load(Some(path)).unwrap();
        assert_eq!(loaded.agent.permission, PermissionPolicy::Prompt);
        assert_eq!(loaded.usb.write_timeout_ms, 42);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = SetTimeConfig::load(Some(dir.path().join("missing.toml")));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_invalid_file_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[agent\n").unwrap();

        let message = format!("{:#}", SetTimeConfig::load(Some(path)).unwrap_err());
        assert!(message.contains("bad.toml"));
    }
}
