//! StoryFlow configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::AspectRatio;

/// Main StoryFlow configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Image provider configuration
    pub image: ImageConfig,

    /// Flow defaults
    pub flow: FlowConfig,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level", skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .storyflow.yml
        let local_config = PathBuf::from(".storyflow.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/storyflow/storyflow.yml
        if let Some(user_config) = Self::user_config_path()
            && user_config.exists()
        {
            match Self::load_from_file(&user_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only the log level, before logging is set up
    ///
    /// Errors are swallowed: the full load reports them once logging works.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let candidates = match config_path {
            Some(path) => vec![path.clone()],
            None => {
                let mut paths = vec![PathBuf::from(".storyflow.yml")];
                paths.extend(Self::user_config_path());
                paths
            }
        };

        candidates
            .iter()
            .filter(|p| p.exists())
            .find_map(|p| fs::read_to_string(p).ok())
            .and_then(|content| serde_yaml::from_str::<Self>(&content).ok())
            .and_then(|config| config.log_level)
    }

    fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("storyflow").join("storyflow.yml"))
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Image provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    /// Provider name (currently only "gemini" supported)
    pub provider: String,

    /// Model used for scene generation
    pub model: String,

    /// Model used for upscaling
    #[serde(rename = "upscale-model")]
    pub upscale_model: String,

    /// Environment variable containing the API key
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,

    /// File containing the API key (used when the env var is unset)
    #[serde(rename = "api-key-file", skip_serializing_if = "Option::is_none")]
    pub api_key_file: Option<PathBuf>,

    /// API base URL
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,

    /// Target size requested from the upscale model
    #[serde(rename = "upscale-size")]
    pub upscale_size: String,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            model: "gemini-2.5-flash-image".to_string(),
            upscale_model: "gemini-3-pro-image-preview".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            api_key_file: None,
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            timeout_ms: 180_000,
            upscale_size: "2K".to_string(),
        }
    }
}

impl ImageConfig {
    /// Resolve the API key: environment variable first, then key file
    pub fn get_api_key(&self) -> Result<String> {
        if let Ok(key) = std::env::var(&self.api_key_env)
            && !key.trim().is_empty()
        {
            return Ok(key.trim().to_string());
        }

        if let Some(path) = &self.api_key_file {
            let expanded = expand_home(path);
            let key = fs::read_to_string(&expanded)
                .context(format!("Failed to read API key file {}", expanded.display()))?;
            let key = key.trim();
            if !key.is_empty() {
                return Ok(key.to_string());
            }
        }

        Err(eyre::eyre!(
            "Image API key not found. Set the {} environment variable.",
            self.api_key_env
        ))
    }
}

/// Flow defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Aspect ratio for new flows
    #[serde(rename = "aspect-ratio")]
    pub aspect_ratio: AspectRatio,

    /// Where exported images are written
    #[serde(rename = "output-dir")]
    pub output_dir: PathBuf,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            aspect_ratio: AspectRatio::Wide,
            output_dir: PathBuf::from("storyflow-out"),
        }
    }
}

/// Expand a leading `~/`
fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir().map(|home| home.join(rest)).unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}
