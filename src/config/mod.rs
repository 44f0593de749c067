use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::CastscribeError;

/// Default Gemini inline-payload limit; larger audio goes through the Files API.
const DEFAULT_UPLOAD_THRESHOLD: u64 = 20 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Gemini configuration
    pub gemini: GeminiConfig,

    /// Application settings
    pub app: AppConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    /// Model used for transcription and batch jobs
    pub model: String,

    /// API key; the GOOGLE_API_KEY environment variable takes precedence
    pub api_key: Option<String>,

    /// File size above which audio is uploaded instead of sent inline
    pub upload_threshold_bytes: u64,

    /// Default seconds between batch job status polls
    pub batch_poll_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Cache root for transcript records (default: OS cache dir)
    pub cache_dir: Option<PathBuf>,

    /// Directory for plain-text transcript files (default: <cache_dir>/transcripts)
    pub output_dir: Option<PathBuf>,

    /// Default number of episodes when listing a feed
    pub default_episode_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gemini: GeminiConfig {
                model: "gemini-1.5-flash".to_string(),
                api_key: None,
                upload_threshold_bytes: DEFAULT_UPLOAD_THRESHOLD,
                batch_poll_interval_secs: 60,
            },
            app: AppConfig {
                cache_dir: None,
                output_dir: None,
                default_episode_limit: 10,
            },
        }
    }
}

impl Config {
    /// Load configuration from file or create default
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            let content = fs_err::read_to_string(&config_path)
                .context("Failed to read config file")?;

            let config: Config = serde_yaml::from_str(&content)
                .context("Failed to parse config file")?;

            Ok(config)
        } else {
            let config = Self::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            fs_err::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self)
            .context("Failed to serialize config")?;

        fs_err::write(&config_path, content)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Get configuration file path
    pub fn config_path() -> Result<PathBuf> {
        // First try current directory for easy testing
        let local_config = PathBuf::from("config.yaml");
        if local_config.exists() {
            return Ok(local_config);
        }

        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?;

        Ok(config_dir.join("castscribe").join("config.yaml"))
    }

    /// Resolved cache root directory
    pub fn cache_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.app.cache_dir {
            return Ok(dir.clone());
        }

        let cache_dir = dirs::cache_dir()
            .context("Could not determine cache directory")?;

        Ok(cache_dir.join("castscribe"))
    }

    /// Resolved directory for plain-text transcript files
    pub fn output_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.app.output_dir {
            return Ok(dir.clone());
        }

        Ok(self.cache_dir()?.join("transcripts"))
    }

    /// Resolve the Gemini API key: environment first, then config file
    pub fn api_key(&self) -> Result<String> {
        if let Ok(key) = std::env::var("GOOGLE_API_KEY") {
            if !key.is_empty() {
                return Ok(key);
            }
        }

        self.gemini
            .api_key
            .clone()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| CastscribeError::MissingApiKey.into())
    }

    /// Display current configuration
    pub fn display(&self) {
        println!("Current Configuration:");
        println!("  Gemini Model: {}", self.gemini.model);
        println!(
            "  API Key: {}",
            if self.api_key().is_ok() { "configured" } else { "missing" }
        );
        println!("  Upload Threshold: {} bytes", self.gemini.upload_threshold_bytes);
        println!("  Batch Poll Interval: {}s", self.gemini.batch_poll_interval_secs);
        if let Ok(dir) = self.cache_dir() {
            println!("  Cache Dir: {}", dir.display());
        }
        if let Ok(dir) = self.output_dir() {
            println!("  Output Dir: {}", dir.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.gemini.model, "gemini-1.5-flash");
        assert_eq!(config.gemini.upload_threshold_bytes, 20 * 1024 * 1024);
        assert_eq!(config.app.default_episode_limit, 10);
    }

    #[test]
    fn test_output_dir_defaults_under_cache_dir() {
        let mut config = Config::default();
        config.app.cache_dir = Some(PathBuf::from("/tmp/castscribe-test"));
        assert_eq!(
            config.output_dir().unwrap(),
            PathBuf::from("/tmp/castscribe-test/transcripts")
        );
    }

    #[test]
    fn test_config_yaml_roundtrip() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.gemini.model, config.gemini.model);
        assert_eq!(parsed.app.default_episode_limit, config.app.default_episode_limit);
    }
}
