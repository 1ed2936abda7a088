//! Listener configuration management

use crate::selection::{DeviceFilter, SelectionMode};
use crate::session::SessionOptions;
use crate::transfer::AttachOptions;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Largest accepted interrupt buffer
pub const MAX_BUFFER_CAPACITY: usize = 4096;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ListenerConfig {
    #[serde(default)]
    pub listener: ListenerSettings,
    #[serde(default)]
    pub usb: UsbSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListenerSettings {
    #[serde(default = "ListenerSettings::default_log_level")]
    pub log_level: String,
    /// Which candidates to attach to ("first" or "all")
    #[serde(default)]
    pub selection: SelectionMode,
    /// VID:PID patterns restricting candidates (empty = any)
    #[serde(default)]
    pub filters: Vec<String>,
    /// Interrupt transfer buffer size in bytes
    #[serde(default = "ListenerSettings::default_buffer_capacity")]
    pub buffer_capacity: usize,
    /// Upper bound on one dispatch round
    #[serde(default = "ListenerSettings::default_dispatch_timeout_ms")]
    pub dispatch_timeout_ms: u64,
    /// Upper bound on waiting for cancellation acknowledgements at shutdown
    #[serde(default = "ListenerSettings::default_teardown_timeout_ms")]
    pub teardown_timeout_ms: u64,
}

impl Default for ListenerSettings {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
            selection: SelectionMode::First,
            filters: Vec::new(),
            buffer_capacity: Self::default_buffer_capacity(),
            dispatch_timeout_ms: Self::default_dispatch_timeout_ms(),
            teardown_timeout_ms: Self::default_teardown_timeout_ms(),
        }
    }
}

impl ListenerSettings {
    fn default_log_level() -> String {
        "info".to_string()
    }

    fn default_buffer_capacity() -> usize {
        8 // Boot mouse reports fit comfortably
    }

    fn default_dispatch_timeout_ms() -> u64 {
        1
    }

    fn default_teardown_timeout_ms() -> u64 {
        100
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsbSettings {
    /// Let libusb detach a bound kernel driver when claiming
    #[serde(default = "UsbSettings::default_auto_detach")]
    pub auto_detach_kernel_driver: bool,
}

impl Default for UsbSettings {
    fn default() -> Self {
        Self {
            auto_detach_kernel_driver: Self::default_auto_detach(),
        }
    }
}

impl UsbSettings {
    fn default_auto_detach() -> bool {
        true
    }
}

impl ListenerConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            expand_path(&p)
        } else {
            // Try standard locations in order
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/usb-mouse-listener/listener.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config = Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Parse and validate a TOML document
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: ListenerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {:#}, using defaults", e);
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
            config_dir.join("usb-mouse-listener").join("listener.toml")
        } else {
            PathBuf::from(".config/usb-mouse-listener/listener.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.listener.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.listener.log_level,
                valid_levels.join(", ")
            ));
        }

        self.filters()?;

        let capacity = self.listener.buffer_capacity;
        if capacity == 0 || capacity > MAX_BUFFER_CAPACITY {
            return Err(anyhow!(
                "Invalid buffer_capacity {}, must be between 1 and {}",
                capacity,
                MAX_BUFFER_CAPACITY
            ));
        }

        if self.listener.dispatch_timeout_ms == 0 {
            return Err(anyhow!("dispatch_timeout_ms must be at least 1"));
        }

        if self.listener.teardown_timeout_ms == 0 {
            return Err(anyhow!("teardown_timeout_ms must be at least 1"));
        }

        Ok(())
    }

    /// Parsed device filters
    pub fn filters(&self) -> Result<Vec<DeviceFilter>> {
        self.listener
            .filters
            .iter()
            .map(|f| f.parse::<DeviceFilter>().map_err(|e| anyhow!(e)))
            .collect()
    }

    /// Session options described by this configuration
    pub fn session_options(&self) -> Result<SessionOptions> {
        Ok(SessionOptions {
            strategy: self.listener.selection.into(),
            filters: self.filters()?,
            attach: AttachOptions {
                buffer_capacity: self.listener.buffer_capacity,
                auto_detach_kernel_driver: self.usb.auto_detach_kernel_driver,
            },
            dispatch_timeout: Duration::from_millis(self.listener.dispatch_timeout_ms),
            teardown_timeout: Duration::from_millis(self.listener.teardown_timeout_ms),
        })
    }
}

/// Expand a leading `~` and environment variables in a user-supplied path
pub fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    match shellexpand::full(&raw) {
        Ok(expanded) => PathBuf::from(expanded.into_owned()),
        Err(_) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ListenerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.listener.buffer_capacity, 8);
        assert_eq!(config.listener.dispatch_timeout_ms, 1);
        assert!(config.usb.auto_detach_kernel_driver);
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = ListenerConfig::default();
        config.listener.log_level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_timeouts_rejected() {
        let mut config = ListenerConfig::default();
        config.listener.teardown_timeout_ms = 0;
        assert!(config.validate().is_err());
        config.listener.teardown_timeout_ms = 1;
        assert!(config.validate().is_ok());
        config.listener.dispatch_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_buffer_capacity_bounds() {
        let mut config = ListenerConfig::default();
        config.listener.buffer_capacity = 0;
        assert!(config.validate().is_err());
        config.listener.buffer_capacity = MAX_BUFFER_CAPACITY + 1;
        assert!(config.validate().is_err());
        config.listener.buffer_capacity = 64;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_session_options_mapping() {
        let mut config = ListenerConfig::default();
        config.listener.selection = SelectionMode::All;
        config.listener.filters = vec!["0x046d:*".to_string()];
        config.usb.auto_detach_kernel_driver = false;

        let options = config.session_options().unwrap();
        assert!(!options.strategy.single());
        assert_eq!(options.filters.len(), 1);
        assert!(!options.attach.auto_detach_kernel_driver);
        assert_eq!(options.dispatch_timeout, Duration::from_millis(1));
    }

    #[test]
    fn test_expand_path_without_tilde() {
        let p = PathBuf::from("/etc/usb-mouse-listener/listener.toml");
        assert_eq!(expand_path(&p), p);
    }
}
