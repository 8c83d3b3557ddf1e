//! Console configuration, loaded from `~/.phonepilot/config.toml`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config {path}: {reason}")]
    Invalid { path: PathBuf, reason: String },
}

/// Model backend settings forwarded to the agent on init.
///
/// Unset fields fall back to the server's own defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub frequency_penalty: f32,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            model_name: None,
            max_tokens: 3000,
            temperature: 0.0,
            top_p: 0.85,
            frequency_penalty: 0.2,
        }
    }
}

/// Agent behavior settings forwarded on init.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    pub max_steps: u32,
    pub lang: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    pub verbose: bool,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_steps: 100,
            lang: "cn".to_string(),
            system_prompt: None,
            verbose: true,
        }
    }
}

/// Timer settings of the console's background loops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Device roster refresh period.
    pub device_refresh_ms: u64,
    /// Screenshot fallback poll period.
    pub screenshot_interval_ms: u64,
    /// How long the live view may take to produce its first frame.
    pub video_timeout_ms: u64,
    /// Lifetime of a tap/swipe feedback toast.
    pub tap_feedback_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            device_refresh_ms: 3000,
            screenshot_interval_ms: 500,
            video_timeout_ms: 5000,
            tap_feedback_ms: 2000,
        }
    }
}

impl PollingConfig {
    /// Never shorter than 1 ms.
    pub fn device_refresh(&self) -> Duration {
        Duration::from_millis(self.device_refresh_ms.max(1))
    }

    /// Never shorter than 1 ms.
    pub fn screenshot_interval(&self) -> Duration {
        Duration::from_millis(self.screenshot_interval_ms.max(1))
    }

    /// First zero period that would stall a background loop.
    fn validate(&self) -> Result<(), String> {
        if self.device_refresh_ms == 0 {
            return Err("polling.device_refresh_ms must be greater than zero".to_string());
        }
        if self.screenshot_interval_ms == 0 {
            return Err("polling.screenshot_interval_ms must be greater than zero".to_string());
        }
        Ok(())
    }

    pub fn video_timeout(&self) -> Duration {
        Duration::from_millis(self.video_timeout_ms)
    }

    pub fn tap_feedback(&self) -> Duration {
        Duration::from_millis(self.tap_feedback_ms)
    }
}

/// Top-level console configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Base URL of the agent server (no trailing slash).
    pub server_url: String,
    pub model: ModelSettings,
    pub agent: AgentSettings,
    pub polling: PollingConfig,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8000".to_string(),
            model: ModelSettings::default(),
            agent: AgentSettings::default(),
            polling: PollingConfig::default(),
        }
    }
}

impl ConsoleConfig {
    /// Default config file location (`~/.phonepilot/config.toml`).
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".phonepilot").join("config.toml"))
    }

    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let mut config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.server_url = config.server_url.trim_end_matches('/').to_string();
        config
            .polling
            .validate()
            .map_err(|reason| ConfigError::Invalid {
                path: path.to_path_buf(),
                reason,
            })?;
        Ok(config)
    }

    /// Apply `PHONEPILOT_*` environment overrides.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup (the environment in production).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
        if let Some(url) = get("PHONEPILOT_SERVER_URL") {
            self.server_url = url.trim_end_matches('/').to_string();
        }
        if let Some(url) = get("PHONEPILOT_MODEL_BASE_URL") {
            self.model.base_url = Some(url);
        }
        if let Some(name) = get("PHONEPILOT_MODEL_NAME") {
            self.model.model_name = Some(name);
        }
        if let Some(key) = get("PHONEPILOT_API_KEY") {
            self.model.api_key = Some(key);
        }
    }
}
