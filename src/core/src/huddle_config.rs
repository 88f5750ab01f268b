use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::config::ServerConfig;
use crate::paths::huddle_config_path;
use crate::runs::RetryPolicy;

/// Contents of `config.toml` under the huddle home directory.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HuddleConfig {
    pub retry: RetryConfig,
    pub provider: ProviderConfig,
    pub runs: RunsConfig,
}

impl HuddleConfig {
    /// Load from the default location. A missing file yields defaults.
    pub fn load() -> Result<Self, String> {
        Self::load_from_path(&huddle_config_path()?)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|e| format!("read config.toml: {e}"))?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        toml::from_str(raw).map_err(|e| format!("parse config.toml: {e}"))
    }

    pub fn config_path() -> Result<PathBuf, String> {
        huddle_config_path()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts.max(1),
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms.max(self.retry.base_delay_ms)),
        }
    }

    /// Overlay file settings on top of `config`.
    pub fn apply_to(&self, config: &mut ServerConfig) {
        config.retry = self.retry_policy();
        if let Some(max) = self.runs.max_tool_calls.filter(|max| *max > 0) {
            config.max_tool_calls = max;
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Echo,
    None,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    /// Pause between streamed echo chunks.
    pub echo_delay_ms: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Echo,
            echo_delay_ms: 25,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RunsConfig {
    pub max_tool_calls: Option<usize>,
}
