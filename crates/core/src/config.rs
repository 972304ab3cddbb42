//! Configuration system for Conclave
//!
//! Supports loading configuration from `~/.conclave/config.toml`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::invocation::{
    InvocationRequest, TimeLimit, TimeoutPolicy, DEFAULT_INACTIVITY_GAP_MS,
    DEFAULT_TIME_TO_FIRST_BYTE_MS,
};

/// Main configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// External reasoning engine invoked by the supervisor
    #[serde(default)]
    pub engine: EngineConfig,

    /// Supervision timeout bounds
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

/// Engine command configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Engine executable
    #[serde(default = "default_program")]
    pub program: PathBuf,

    /// Model/engine selector passed on the command line
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Skip the engine's own interactive approval gate
    #[serde(default)]
    pub bypass_approvals: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            model: None,
            bypass_approvals: false,
        }
    }
}

/// Timeout bounds in milliseconds; `0` disables a bound.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_time_to_first_byte_ms")]
    pub time_to_first_byte_ms: u64,

    #[serde(default = "default_inactivity_gap_ms")]
    pub inactivity_gap_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            time_to_first_byte_ms: default_time_to_first_byte_ms(),
            inactivity_gap_ms: default_inactivity_gap_ms(),
        }
    }
}

impl TimeoutConfig {
    /// Build the supervision timeout policy.
    pub fn policy(&self) -> TimeoutPolicy {
        TimeoutPolicy {
            time_to_first_byte: limit_from_ms(self.time_to_first_byte_ms),
            inactivity_gap: limit_from_ms(self.inactivity_gap_ms),
        }
    }
}

fn limit_from_ms(ms: u64) -> TimeLimit {
    if ms == 0 {
        TimeLimit::Unbounded
    } else {
        TimeLimit::from_millis(ms)
    }
}

fn default_program() -> PathBuf {
    PathBuf::from("codex")
}

fn default_time_to_first_byte_ms() -> u64 {
    DEFAULT_TIME_TO_FIRST_BYTE_MS
}

fn default_inactivity_gap_ms() -> u64 {
    DEFAULT_INACTIVITY_GAP_MS
}

impl Config {
    /// Load configuration from the default path (~/.conclave/config.toml)
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::default_config_path()?;
        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::ParseError)
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
        Ok(home.join(".conclave").join("config.toml"))
    }

    /// Build an invocation request for `prompt` from the configured engine
    /// command and timeout bounds.
    pub fn request(&self, prompt: impl Into<String>) -> InvocationRequest {
        let mut request = InvocationRequest::new(self.engine.program.clone(), prompt)
            .bypass_approvals(self.engine.bypass_approvals)
            .timeouts(self.timeouts.policy());
        if let Some(model) = &self.engine.model {
            request = request.model(model.clone());
        }
        request
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("could not determine home directory")]
    NoHomeDir,
}
