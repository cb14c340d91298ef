//! Configuration management.
//!
//! Read from `$XDG_CONFIG_HOME/reelfeed/config.toml`.  Every field has a
//! default, so a missing file (or a file with only some sections) is fine.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Where the feed manifest lives.  The first command-line argument
    /// overrides it.
    #[serde(default = "default_manifest_url")]
    pub manifest_url: String,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub visibility: VisibilityConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub network: NetworkConfig,
}

fn default_manifest_url() -> String {
    "http://localhost:8000/videos.json".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            manifest_url: default_manifest_url(),
            cache: CacheConfig::default(),
            visibility: VisibilityConfig::default(),
            playback: PlaybackConfig::default(),
            network: NetworkConfig::default(),
        }
    }
}

/// Persistent cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Version tag.  Bumping it discards every entry of the old tag.
    #[serde(default = "default_generation")]
    pub generation: String,
    /// Cache root; defaults to the platform cache directory.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    /// App-shell resources (relative to the manifest) pre-cached at startup
    #[serde(default = "default_app_shell")]
    pub app_shell: Vec<String>,
}

fn default_generation() -> String {
    "reelfeed-cache-v1".to_string()
}

fn default_app_shell() -> Vec<String> {
    vec!["videos.json".to_string()]
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            generation: default_generation(),
            directory: None,
            app_shell: default_app_shell(),
        }
    }
}

impl CacheConfig {
    pub fn root(&self) -> Result<PathBuf> {
        match &self.directory {
            Some(dir) => Ok(dir.clone()),
            None => {
                let base = dirs::cache_dir().context("Could not determine cache directory")?;
                Ok(base.join("reelfeed"))
            }
        }
    }
}

/// Visibility configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisibilityConfig {
    /// Fraction of a card that must be on screen for it to play.
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    /// Pre-roll distance, in viewport heights, for early loading.  0 disables.
    #[serde(default = "default_preload_margin")]
    pub preload_margin: f64,
}

fn default_threshold() -> f64 {
    0.5
}

fn default_preload_margin() -> f64 {
    1.0
}

impl Default for VisibilityConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            preload_margin: default_preload_margin(),
        }
    }
}

/// Playback configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Allow playback before the first key press.
    #[serde(default)]
    pub autoplay: bool,
    /// Rates cycled through by the speed key; the first is the initial one.
    #[serde(default = "default_speeds")]
    pub speeds: Vec<f32>,
    #[serde(default = "default_info_overlay_secs")]
    pub info_overlay_secs: u64,
}

fn default_speeds() -> Vec<f32> {
    vec![1.0, 0.75, 0.5]
}

fn default_info_overlay_secs() -> u64 {
    3
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            autoplay: false,
            speeds: default_speeds(),
            info_overlay_secs: default_info_overlay_secs(),
        }
    }
}

impl PlaybackConfig {
    pub fn info_overlay(&self) -> Duration {
        Duration::from_secs(self.info_overlay_secs)
    }
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl NetworkConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.visibility.threshold) {
            bail!(
                "visibility.threshold must be between 0 and 1, got {}",
                self.visibility.threshold
            );
        }
        if !self.visibility.preload_margin.is_finite() || self.visibility.preload_margin < 0.0 {
            bail!(
                "visibility.preload_margin must be zero or positive, got {}",
                self.visibility.preload_margin
            );
        }
        if self.playback.speeds.is_empty() {
            bail!("playback.speeds must list at least one rate");
        }
        if let Some(bad) = self.playback.speeds.iter().find(|s| !(s.is_finite() && **s > 0.0)) {
            bail!("playback.speeds must be positive, got {bad}");
        }
        if self.network.timeout_secs == 0 {
            bail!("network.timeout_secs must be at least 1");
        }
        Ok(())
    }
}

/// Get the config file path (~/.config/reelfeed/config.toml)
pub fn config_path() -> Result<PathBuf> {
    let dir = dirs::config_dir().context("Could not determine config directory")?;
    Ok(dir.join("reelfeed").join("config.toml"))
}

/// Load configuration from the default path, or return defaults if absent
pub fn load() -> Result<Config> {
    load_from(&config_path()?)
}

/// Load configuration from `path`, or return defaults if it does not exist
pub fn load_from(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;
    let config: Config = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;
    config
        .validate()
        .with_context(|| format!("Invalid config: {:?}", path))?;
    Ok(config)
}
