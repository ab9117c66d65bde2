use crate::audio::AudioFormat;
use crate::audio::format::DEFAULT_PREFERENCES;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_database_url")]
    pub database_url: String,

    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,

    /// Recording MIME types in order of preference.
    #[serde(default = "default_format_preferences")]
    pub format_preferences: Vec<String>,

    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    #[serde(default = "default_channels")]
    pub channels: u16,

    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default)]
    pub api_key: String,

    #[serde(default)]
    pub token: Option<String>,
}

fn default_database_url() -> String {
    let data_dir = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .or_else(|_| std::env::var("HOME").map(|home| PathBuf::from(home).join(".local/share")))
        .unwrap_or_else(|_| PathBuf::from("."));
    format!("sqlite://{}", data_dir.join("soundbank").join("sounds.db").display())
}

fn default_call_timeout() -> u64 {
    30
}

fn default_format_preferences() -> Vec<String> {
    DEFAULT_PREFERENCES.iter().map(|p| p.to_string()).collect()
}

fn default_sample_rate() -> u32 {
    AudioFormat::default().sample_rate
}

fn default_channels() -> u16 {
    AudioFormat::default().channels
}

fn default_api_url() -> String {
    "https://freesound.org/apiv2".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            call_timeout_secs: default_call_timeout(),
            format_preferences: default_format_preferences(),
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            api_url: default_api_url(),
            api_key: String::new(),
            token: None,
        }
    }
}

impl Config {
    /// Load configuration from the default location (~/.config/soundbank/config.json)
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            tracing::info!(
                "Config file not found at {:?}, creating default config",
                config_path
            );
            let config = Self::default();
            config.save_to(config_path)?;
            return Ok(config);
        }

        let contents = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", config_path))?;

        tracing::info!("Loaded config from {:?}", config_path);
        Ok(config)
    }

    /// Write the configuration to `config_path`, creating its directory
    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(config_path, contents)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        tracing::info!("Saved config to {:?}", config_path);
        Ok(())
    }

    /// Get the path to the configuration file
    fn config_path() -> Result<PathBuf> {
        let config_dir = if let Ok(dir) = std::env::var("XDG_CONFIG_HOME") {
            PathBuf::from(dir)
        } else {
            let home = std::env::var("HOME").context("HOME environment variable not set")?;
            PathBuf::from(home).join(".config")
        };

        Ok(config_dir.join("soundbank").join("config.json"))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.database_url.is_empty() {
            return Err(anyhow::anyhow!("database_url cannot be empty"));
        }

        if self.call_timeout_secs == 0 {
            return Err(anyhow::anyhow!("call_timeout_secs must be at least 1"));
        }

        if self.format_preferences.is_empty() {
            return Err(anyhow::anyhow!("format_preferences cannot be empty"));
        }

        if !(8_000..=192_000).contains(&self.sample_rate) {
            return Err(anyhow::anyhow!(
                "sample_rate must be between 8000 and 192000"
            ));
        }

        if !(1..=2).contains(&self.channels) {
            return Err(anyhow::anyhow!("channels must be 1 or 2"));
        }

        if self.api_url.is_empty() {
            return Err(anyhow::anyhow!("api_url cannot be empty"));
        }

        Ok(())
    }

    pub fn audio_format(&self) -> AudioFormat {
        AudioFormat {
            sample_rate: self.sample_rate,
            channels: self.channels,
        }
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}
