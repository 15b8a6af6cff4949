//! Configuration loading and validation for agentloop.
//!
//! Loads configuration from `~/.agentloop/config.toml` with environment
//! variable overrides. A missing file means defaults. Everything is
//! validated before a run starts, so a bad setting fails fast instead of
//! surfacing mid-run.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.agentloop/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Default LLM provider
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per LLM response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// The agent whose identity owns generated messages
    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_provider() -> String {
    "openrouter".into()
}
fn default_model() -> String {
    "anthropic/claude-sonnet-4".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_agent_id")]
    pub id: String,

    /// Base system prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_role: Option<String>,

    /// Whether the model accepts native function calls. When false, tool
    /// calls are replayed as plain text.
    #[serde(default = "default_true")]
    pub function_calling: bool,

    /// Whether the model accepts image input
    #[serde(default)]
    pub vision: bool,
}

fn default_agent_id() -> String {
    "default".into()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            id: default_agent_id(),
            system_role: None,
            function_calling: true,
            vision: false,
        }
    }
}

/// Run loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Hard limit on steps per run
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    /// Keep only the most recent N messages in the model context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_count: Option<usize>,

    /// Append the current date to the system message
    #[serde(default = "default_true")]
    pub inject_system_date: bool,

    /// Drop the oldest turns once the context exceeds this estimate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_context_tokens: Option<usize>,

    #[serde(default)]
    pub compression: CompressionConfig,
}

fn default_max_steps() -> u32 {
    25
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            history_count: None,
            inject_system_date: true,
            max_context_tokens: None,
            compression: CompressionConfig::default(),
        }
    }
}

/// History compression settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Compress once uncompressed history is estimated above this many tokens
    #[serde(default = "default_threshold_tokens")]
    pub threshold_tokens: usize,

    /// Most recent messages never folded into a summary
    #[serde(default = "default_keep_recent")]
    pub keep_recent: usize,
}

fn default_threshold_tokens() -> usize {
    32_000
}
fn default_keep_recent() -> usize {
    6
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold_tokens: default_threshold_tokens(),
            keep_recent: default_keep_recent(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Per-model pricing overrides
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pricing: Vec<PricingOverride>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pricing: Vec::new(),
        }
    }
}

/// Custom per-million-token pricing for a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingOverride {
    pub model: String,
    pub input_per_m: f64,
    pub output_per_m: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.agentloop/config.toml).
    ///
    /// Environment overrides, highest priority:
    /// - `AGENTLOOP_PROVIDER`
    /// - `AGENTLOOP_MODEL`
    /// - `AGENTLOOP_MAX_STEPS`
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::config_path())?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// production).
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(provider) = lookup("AGENTLOOP_PROVIDER") {
            self.default_provider = provider;
        }
        if let Some(model) = lookup("AGENTLOOP_MODEL") {
            self.default_model = model;
        }
        if let Some(raw) = lookup("AGENTLOOP_MAX_STEPS") {
            self.runtime.max_steps = raw.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!("AGENTLOOP_MAX_STEPS is not a number: {raw}"))
            })?;
        }
        self.validate()
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".agentloop")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.default_temperature) {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.default_model.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "default_model must not be empty".into(),
            ));
        }

        if self.runtime.max_steps == 0 {
            return Err(ConfigError::ValidationError(
                "runtime.max_steps must be at least 1".into(),
            ));
        }

        if self.runtime.compression.enabled && self.runtime.compression.keep_recent == 0 {
            return Err(ConfigError::ValidationError(
                "runtime.compression.keep_recent must be at least 1 when compression is enabled"
                    .into(),
            ));
        }

        if let Some(p) = self
            .telemetry
            .pricing
            .iter()
            .find(|p| p.input_per_m < 0.0 || p.output_per_m < 0.0)
        {
            return Err(ConfigError::ValidationError(format!(
                "pricing for {} must not be negative",
                p.model
            )));
        }

        Ok(())
    }

    /// Generate a default config TOML string (for `config init`).
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_provider: default_provider(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            agent: AgentConfig::default(),
            runtime: RuntimeConfig::default(),
            telemetry: TelemetryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
