//! Per-run configuration.

use crate::context::config::{PipelineConfig, SystemDate, ToolsConfig};
use agentloop_config::AppConfig;
use agentloop_core::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// When and how older history is summarised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionSettings {
    pub enabled: bool,
    /// Estimated tokens of uncompressed history that trigger compression
    pub threshold_tokens: usize,
    /// Most recent messages never summarised
    pub keep_recent: usize,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold_tokens: 32_000,
            keep_recent: 6,
        }
    }
}

/// Everything a run needs besides its collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub model: String,
    pub provider: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub max_steps: u32,
    /// Agent that owns generated messages outside group chats
    pub agent_id: String,
    /// Base context configuration; the runtime fills in per-step fields
    pub pipeline: PipelineConfig,
    pub compression: CompressionSettings,
    pub telemetry_enabled: bool,
    /// Restrict the executor's tools to these identifiers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled_tools: Option<Vec<String>>,
}

impl RunConfig {
    pub fn new(model: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            pipeline: PipelineConfig::new(model.clone()),
            model,
            provider: String::new(),
            temperature: 0.7,
            max_tokens: None,
            max_steps: 25,
            agent_id: "default".into(),
            compression: CompressionSettings::default(),
            telemetry_enabled: true,
            enabled_tools: None,
        }
    }

    /// Map the file configuration into a run configuration.
    pub fn from_app_config(app: &AppConfig) -> Self {
        let mut pipeline = PipelineConfig::new(app.default_model.clone());
        pipeline.provider = app.default_provider.clone();
        pipeline.system_role = app.agent.system_role.clone();
        pipeline.history_count = app.runtime.history_count;
        pipeline.max_context_tokens = app.runtime.max_context_tokens;
        pipeline.vision_supported = app.agent.vision;
        if app.runtime.inject_system_date {
            pipeline.system_date = SystemDate::Now;
        }
        if !app.agent.function_calling {
            pipeline.tools_config = Some(ToolsConfig {
                manifests: Vec::new(),
                function_call_supported: false,
            });
        }

        Self {
            model: app.default_model.clone(),
            provider: app.default_provider.clone(),
            temperature: app.default_temperature,
            max_tokens: Some(app.default_max_tokens),
            max_steps: app.runtime.max_steps,
            agent_id: app.agent.id.clone(),
            pipeline,
            compression: CompressionSettings {
                enabled: app.runtime.compression.enabled,
                threshold_tokens: app.runtime.compression.threshold_tokens,
                keep_recent: app.runtime.compression.keep_recent,
            },
            telemetry_enabled: app.telemetry.enabled,
            enabled_tools: None,
        }
    }

    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = agent_id.into();
        self
    }

    pub fn with_pipeline(mut self, pipeline: PipelineConfig) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn with_compression(mut self, compression: CompressionSettings) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_enabled_tools(mut self, tools: Vec<String>) -> Self {
        self.enabled_tools = Some(tools);
        self
    }

    /// Reject configurations no step could run with.
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(Error::config("no model configured for this run"));
        }
        if self.agent_id.trim().is_empty() {
            return Err(Error::config("no agent configured for this run"));
        }
        if self.max_steps == 0 {
            return Err(Error::config("max_steps must be at least 1"));
        }
        if self.compression.enabled && self.compression.keep_recent == 0 {
            return Err(Error::config("compression keep_recent must be at least 1"));
        }
        Ok(())
    }

    /// Whether the function-calling flag permits offering tools.
    pub fn function_calling(&self) -> bool {
        self.pipeline.function_calling()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_model_is_a_config_error() {
        let err = RunConfig::new("  ").validate().unwrap_err();
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn default_run_config_is_valid() {
        assert!(RunConfig::new("gpt-4o").validate().is_ok());
    }

    #[test]
    fn maps_file_config() {
        let mut app = AppConfig::default();
        app.runtime.max_steps = 7;
        app.runtime.compression.enabled = true;
        app.agent.system_role = Some("Be terse".into());
        app.agent.function_calling = false;

        let run = RunConfig::from_app_config(&app);

        assert_eq!(run.max_steps, 7);
        assert!(run.compression.enabled);
        assert_eq!(run.pipeline.system_role.as_deref(), Some("Be terse"));
        assert_eq!(run.pipeline.system_date, SystemDate::Now);
        assert!(!run.function_calling());
        assert_eq!(run.model, app.default_model);
    }
}
