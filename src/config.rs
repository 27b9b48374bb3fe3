use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_upload_url")]
    pub upload_url: String,

    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,

    #[serde(default = "default_screenshot_hotkey")]
    pub screenshot_hotkey: String,

    #[serde(default = "default_record_hotkey")]
    pub record_hotkey: String,

    #[serde(default = "default_framerate")]
    pub framerate: u32,

    #[serde(default = "default_notification_enabled")]
    pub notification_enabled: bool,
}

fn default_upload_url() -> String {
    "https://s.h4ks.com/api/".to_string()
}

fn default_max_file_size_mb() -> u64 {
    64
}

fn default_screenshot_hotkey() -> String {
    "ALT+PRINTSCREEN".to_string()
}

fn default_record_hotkey() -> String {
    "CTRL+ALT+PRINTSCREEN".to_string()
}

fn default_framerate() -> u32 {
    30
}

fn default_notification_enabled() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            upload_url: default_upload_url(),
            max_file_size_mb: default_max_file_size_mb(),
            screenshot_hotkey: default_screenshot_hotkey(),
            record_hotkey: default_record_hotkey(),
            framerate: default_framerate(),
            notification_enabled: default_notification_enabled(),
        }
    }
}

impl Config {
    /// Load configuration from the default location (~/.config/h4kshot/config.json)
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            tracing::info!(
                "Config file not found at {:?}, creating default config",
                config_path
            );
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let contents = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", config_path))?;

        tracing::info!("Loaded config from {:?}", config_path);
        Ok(config)
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, contents)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        tracing::info!("Saved config to {:?}", config_path);
        Ok(())
    }

    /// Get the path to the configuration file
    fn config_path() -> Result<PathBuf> {
        let config_dir = if let Ok(dir) = std::env::var("XDG_CONFIG_HOME") {
            PathBuf::from(dir)
        } else {
            dirs::config_dir().context("Could not determine config directory")?
        };

        Ok(config_dir.join("h4kshot").join("config.json"))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.upload_url.is_empty() {
            return Err(anyhow::anyhow!("upload_url cannot be empty"));
        }

        if !self.upload_url.starts_with("http://") && !self.upload_url.starts_with("https://") {
            return Err(anyhow::anyhow!("upload_url must be an http(s) URL"));
        }

        if self.max_file_size_mb == 0 {
            return Err(anyhow::anyhow!("max_file_size_mb must be greater than 0"));
        }

        if self.framerate == 0 || self.framerate > 120 {
            return Err(anyhow::anyhow!("framerate must be between 1 and 120"));
        }

        Ok(())
    }

    /// Upload size ceiling in bytes
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_file_size_bytes(), 64 * 1024 * 1024);
        assert_eq!(config.upload_url, "https://s.h4ks.com/api/");
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: Config = serde_json::from_str(r#"{"framerate": 60}"#).unwrap();
        assert_eq!(config.framerate, 60);
        assert_eq!(config.max_file_size_mb, 64);
        assert_eq!(config.record_hotkey, "CTRL+ALT+PRINTSCREEN");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.upload_url = "ftp://example.com".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.max_file_size_mb = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.framerate = 0;
        assert!(config.validate().is_err());
    }
}
