//! Configuration management
//!
//! Only ambient behaviour is configurable. The OnlyKey allow-list is fixed
//! in the protocol crate.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SetTimeConfig {
    #[serde(default)]
    pub agent: AgentSettings,
    #[serde(default)]
    pub usb: UsbSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "AgentSettings::default_log_level")]
    pub log_level: String,
    /// How permission to write to a matched device is obtained
    #[serde(default)]
    pub permission: PermissionPolicy,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
            permission: PermissionPolicy::default(),
        }
    }
}

impl AgentSettings {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

/// Permission policy for a matched device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionPolicy {
    /// Granted whenever the OS lets us open the device
    #[default]
    Auto,
    /// OS access plus an explicit yes on the terminal
    Prompt,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsbSettings {
    /// Write timeout in milliseconds (0 = wait forever)
    #[serde(default)]
    pub write_timeout_ms: u64,
    /// Listen for hot-plug arrivals in watch mode
    #[serde(default = "UsbSettings::default_hotplug")]
    pub hotplug: bool,
}

impl Default for UsbSettings {
    fn default() -> Self {
        Self {
            write_timeout_ms: 0,
            hotplug: Self::default_hotplug(),
        }
    }
}

impl UsbSettings {
    fn default_hotplug() -> bool {
        true
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

impl SetTimeConfig {
    /// Load configuration from the specified path
    ///
    /// Without a path, the user config directory is tried first, then
    /// `/etc/onlykey-settime/config.toml`.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            [
                Self::default_path(),
                PathBuf::from("/etc/onlykey-settime/config.toml"),
            ]
            .into_iter()
            .find(|p| p.exists())
            .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Parse and validate TOML text
    pub fn parse(content: &str) -> Result<Self> {
        let config: SetTimeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("onlykey-settime").join("config.toml")
        } else {
            PathBuf::from(".config/onlykey-settime/config.toml")
        }
    }

    /// Expand `~` in a user-supplied path
    pub fn expand_path(path: &str) -> PathBuf {
        PathBuf::from(shellexpand::tilde(path).as_ref())
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if !VALID_LOG_LEVELS.contains(&self.agent.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.agent.log_level,
                VALID_LOG_LEVELS.join(", ")
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SetTimeConfig::default();
        assert_eq!(config.agent.log_level, "info");
        assert_eq!(config.agent.permission, PermissionPolicy::Auto);
        assert_eq!(config.usb.write_timeout(), Duration::ZERO);
        assert!(config.usb.hotplug);
    }

    #[test]
    fn test_config_serialization() {
        let config = SetTimeConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed = SetTimeConfig::parse(&toml_str).unwrap();

        assert_eq!(config.agent.log_level, parsed.agent.log_level);
        assert_eq!(config.usb.hotplug, parsed.usb.hotplug);
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = SetTimeConfig::default();
        assert!(config.validate().is_ok());

        config.agent.log_level = "invalid".to_string();
        assert!(config.validate().is_err());

        config.agent.log_level = "debug".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_expand_path_plain() {
        assert_eq!(
            SetTimeConfig::expand_path("/etc/onlykey-settime/config.toml"),
            PathBuf::from("/etc/onlykey-settime/config.toml")
        );
    }
}
